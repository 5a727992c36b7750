use crate::shmem_msg::ShmemMsg;
use crate::sync::Arc;
use crate::TileId;
use console::style;
use std::sync::atomic::{AtomicU64, Ordering};

/// A message in flight, tagged with its sending tile.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sender: TileId,
    pub msg: ShmemMsg,
}

/// What a tile's network endpoint receives.
#[derive(Debug)]
pub enum Event {
    Msg(Packet),
    Halt,
}

/// General interconnect between tiles.
///
/// Delivery is reliable and order preserving per destination, so the
/// protocol core never retries. Functions are not mutable because
/// implementations synchronize internally.
pub trait Interconnect: Send + Sync + 'static {
    fn send(&self, src: TileId, dest: TileId, msg: ShmemMsg);
    fn broadcast(&self, src: TileId, msg: ShmemMsg);
    fn num_tiles(&self) -> usize;
}

/// Channel-backed network: one FIFO endpoint per tile.
#[derive(Debug)]
pub struct LocalNetwork {
    senders: Vec<flume::Sender<Event>>,
    num_sent: AtomicU64,
}

impl LocalNetwork {
    #[must_use]
    pub fn new(num_tiles: usize) -> (Self, Vec<flume::Receiver<Event>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..num_tiles).map(|_| flume::unbounded()).unzip();
        (
            Self {
                senders,
                num_sent: AtomicU64::new(0),
            },
            receivers,
        )
    }

    /// Stop all endpoint threads.
    pub fn halt(&self) {
        for sender in &self.senders {
            let _ = sender.send(Event::Halt);
        }
    }

    /// Messages handed to the network so far (quiescence accounting).
    #[must_use]
    pub fn num_sent(&self) -> u64 {
        self.num_sent.load(Ordering::SeqCst)
    }
}

impl Interconnect for LocalNetwork {
    fn send(&self, src: TileId, dest: TileId, msg: ShmemMsg) {
        log::debug!(
            "{}: tile {src} -> tile {dest} {msg}",
            style("NET SEND").bold()
        );
        self.num_sent.fetch_add(1, Ordering::SeqCst);
        self.senders[dest]
            .send(Event::Msg(Packet { sender: src, msg }))
            .expect("network endpoint closed");
    }

    fn broadcast(&self, src: TileId, msg: ShmemMsg) {
        log::debug!("{}: tile {src} -> * {msg}", style("NET BCAST").bold());
        self.num_sent
            .fetch_add(self.senders.len() as u64, Ordering::SeqCst);
        for sender in &self.senders {
            sender
                .send(Event::Msg(Packet {
                    sender: src,
                    msg: msg.clone(),
                }))
                .expect("network endpoint closed");
        }
    }

    fn num_tiles(&self) -> usize {
        self.senders.len()
    }
}

/// A component's handle for sending messages on behalf of its tile.
#[derive(Clone)]
pub struct MsgPort {
    tile_id: TileId,
    network: Arc<dyn Interconnect>,
}

impl std::fmt::Debug for MsgPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgPort").field("tile_id", &self.tile_id).finish()
    }
}

impl MsgPort {
    #[must_use]
    pub fn new(tile_id: TileId, network: Arc<dyn Interconnect>) -> Self {
        Self { tile_id, network }
    }

    #[must_use]
    pub fn tile_id(&self) -> TileId {
        self.tile_id
    }

    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.network.num_tiles()
    }

    pub fn send_msg(&self, receiver: TileId, msg: ShmemMsg) {
        self.network.send(self.tile_id, receiver, msg);
    }

    pub fn broadcast_msg(&self, msg: ShmemMsg) {
        self.network.broadcast(self.tile_id, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shmem_msg::{MemComponent, MsgKind};

    fn msg(addr: crate::address) -> ShmemMsg {
        ShmemMsg::new(
            MsgKind::SH_REQ,
            MemComponent::L2_CACHE,
            MemComponent::DRAM_DIR,
            0,
            addr,
            vec![],
        )
    }

    #[test]
    fn delivery_preserves_order_per_destination() {
        let (network, receivers) = LocalNetwork::new(2);
        network.send(0, 1, msg(0x40));
        network.send(0, 1, msg(0x80));
        network.send(1, 1, msg(0xc0));

        let received: Vec<_> = (0..3)
            .map(|_| match receivers[1].recv().unwrap() {
                Event::Msg(packet) => packet.msg.addr,
                Event::Halt => unreachable!(),
            })
            .collect();
        assert_eq!(received, vec![0x40, 0x80, 0xc0]);
        assert_eq!(network.num_sent(), 3);
    }

    #[test]
    fn broadcast_reaches_every_tile() {
        let (network, receivers) = LocalNetwork::new(3);
        network.broadcast(1, msg(0x100));
        for receiver in &receivers {
            match receiver.recv().unwrap() {
                Event::Msg(packet) => {
                    assert_eq!(packet.sender, 1);
                    assert_eq!(packet.msg.addr, 0x100);
                }
                Event::Halt => unreachable!(),
            }
        }
    }

    #[test]
    fn halt_stops_endpoints() {
        let (network, receivers) = LocalNetwork::new(1);
        network.halt();
        assert!(matches!(receivers[0].recv().unwrap(), Event::Halt));
    }
}
