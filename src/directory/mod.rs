pub mod cache;
pub mod entry;

pub use cache::{Allocation, DirectoryCache};
pub use entry::{DirectoryEntry, DirectoryState};

use crate::dram::DramCntlr;
use crate::network::MsgPort;
use crate::shmem_msg::{MemComponent, MsgKind, ShmemMsg, ShmemReq};
use crate::{address, config, TileId};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

/// What the in-flight transaction at the head of an address queue is
/// waiting for.
#[derive(Debug)]
enum Waiting {
    /// A free way in the directory cache.
    Slot,
    /// Invalidation acknowledgements from these tiles.
    Acks(HashSet<TileId>),
    /// Dirty data flushed back by the owner, which drops its copy.
    Flush(TileId),
    /// Dirty data copied back by the owner, which keeps a shared copy.
    CopyBack(TileId),
}

#[derive(Debug)]
struct Transaction {
    req: ShmemReq,
    waiting: Option<Waiting>,
}

/// Home directory controller.
///
/// Owns the directory cache and backing store for the address range this
/// tile is home for, and is the protocol's per-block serialization point:
/// one transaction per address is in flight at a time, conflicting
/// requests queue FIFO behind it and are serviced strictly after it
/// completes.
#[derive(Debug)]
pub struct DramDirectoryCntlr {
    tile_id: TileId,
    directory: DirectoryCache,
    dram: DramCntlr,
    queues: IndexMap<address, VecDeque<Transaction>>,
    /// Addresses whose head transaction waits for directory capacity.
    slot_waiters: Vec<address>,
    port: MsgPort,
    access_time: u64,
    stats: stats::Directory,
    enabled: bool,
}

impl DramDirectoryCntlr {
    #[must_use]
    pub fn new(tile_id: TileId, config: &config::MemoryConfig, port: MsgPort) -> Self {
        Self {
            tile_id,
            directory: DirectoryCache::new(&config.directory, config.num_tiles, config.block_size),
            dram: DramCntlr::new(&config.dram, config.block_size),
            queues: IndexMap::new(),
            slot_waiters: Vec::new(),
            port,
            access_time: config.directory.access_time,
            stats: stats::Directory::default(),
            enabled: true,
        }
    }

    pub fn handle_msg_from_l2(&mut self, sender: TileId, msg: &ShmemMsg) {
        log::trace!(
            "dram_directory[{}]::handle_msg_from_l2(sender={sender}, {msg})",
            self.tile_id
        );
        if self.enabled {
            self.stats.access_cycles += self.access_time;
        }
        match msg.kind {
            MsgKind::EX_REQ | MsgKind::SH_REQ => self.enqueue_request(msg),
            MsgKind::INV_REP => self.process_inv_rep(sender, msg),
            MsgKind::FLUSH_REP => self.process_flush_rep(sender, msg),
            MsgKind::WB_REP => self.process_wb_rep(sender, msg),
            kind => panic!(
                "directory at tile {} received unrecognized message kind {kind}",
                self.tile_id
            ),
        }
    }

    /// No transaction in flight and nothing queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queues.is_empty()
    }

    #[must_use]
    pub fn peek_entry(&self, addr: address) -> Option<&DirectoryEntry> {
        self.directory.peek(addr)
    }

    #[must_use]
    pub fn dram(&self) -> &DramCntlr {
        &self.dram
    }

    #[must_use]
    pub fn stats(&self) -> &stats::Directory {
        &self.stats
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.dram.enable();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.dram.disable();
    }

    fn enqueue_request(&mut self, msg: &ShmemMsg) {
        if self.enabled {
            self.stats.requests += 1;
        }
        let addr = msg.addr;
        let queued = {
            let queue = self.queues.entry(addr).or_insert_with(VecDeque::new);
            queue.push_back(Transaction {
                req: ShmemReq::new(msg),
                waiting: None,
            });
            queue.len()
        };
        if queued == 1 {
            self.process_head(addr);
        } else {
            log::trace!(
                "dram_directory[{}]::enqueue({addr:#x}): queued behind {} request(s)",
                self.tile_id,
                queued - 1
            );
        }
    }

    /// Queue an internal eviction transaction for a victim entry: all its
    /// sharers (or its owner) must be invalidated before the slot frees.
    fn enqueue_nullify(&mut self, addr: address) {
        if self.enabled {
            self.stats.evictions += 1;
        }
        let msg = ShmemMsg::new(
            MsgKind::NULLIFY_REQ,
            MemComponent::DRAM_DIR,
            MemComponent::DRAM_DIR,
            self.tile_id,
            addr,
            vec![],
        );
        let queued = {
            let queue = self.queues.entry(addr).or_insert_with(VecDeque::new);
            queue.push_back(Transaction {
                req: ShmemReq::new(&msg),
                waiting: None,
            });
            queue.len()
        };
        if queued == 1 {
            self.process_head(addr);
        }
    }

    /// Start processing the head transaction of `addr`'s queue.
    fn process_head(&mut self, addr: address) {
        if self.directory.get_mut(addr).is_none() {
            let queues = &self.queues;
            match self
                .directory
                .allocate(addr, |candidate| queues.contains_key(&candidate))
            {
                Allocation::Allocated => {}
                Allocation::Evict(victim) => {
                    log::debug!(
                        "dram_directory[{}]::process_head({addr:#x}): nullifying entry {victim:#x} first",
                        self.tile_id
                    );
                    self.head_mut(addr).waiting = Some(Waiting::Slot);
                    self.slot_waiters.push(addr);
                    self.enqueue_nullify(victim);
                    return;
                }
                Allocation::Stall => {
                    self.head_mut(addr).waiting = Some(Waiting::Slot);
                    self.slot_waiters.push(addr);
                    return;
                }
            }
        }

        let (kind, requester) = {
            let head = self.head(addr);
            (head.req.kind(), head.req.requester())
        };
        match kind {
            MsgKind::SH_REQ => self.process_sh_req(addr, requester),
            MsgKind::EX_REQ => self.process_ex_req(addr, requester),
            MsgKind::NULLIFY_REQ => self.process_nullify_req(addr),
            kind => unreachable!("{kind} queued as a directory request"),
        }
    }

    fn process_sh_req(&mut self, addr: address, requester: TileId) {
        enum Next {
            Reply { overflowed: bool },
            CopyBack(TileId),
        }
        let next = {
            let entry = self.entry_mut(addr);
            match entry.state {
                DirectoryState::UNCACHED | DirectoryState::SHARED => {
                    let overflowed = entry.add_sharer(requester);
                    entry.state = DirectoryState::SHARED;
                    Next::Reply { overflowed }
                }
                DirectoryState::MODIFIED => {
                    let owner = entry.owner.expect("modified entry has an owner");
                    assert_ne!(
                        owner, requester,
                        "tile {requester} read-requested {addr:#x} while owning it"
                    );
                    Next::CopyBack(owner)
                }
            }
        };
        match next {
            Next::Reply { overflowed } => {
                if overflowed && self.enabled {
                    self.stats.sharer_overflows += 1;
                }
                let data = self.dram.read_block(addr);
                self.send_reply(MsgKind::SH_REP, requester, addr, data);
                self.complete_transaction(addr);
            }
            Next::CopyBack(owner) => {
                self.head_mut(addr).waiting = Some(Waiting::CopyBack(owner));
                self.send_to_l2(MsgKind::WB_REQ, owner, requester, addr);
            }
        }
    }

    fn process_ex_req(&mut self, addr: address, requester: TileId) {
        enum Next {
            Grant,
            Invalidate { targets: Vec<TileId>, broadcast: bool },
            Flush(TileId),
        }
        let next = {
            let entry = self.entry_mut(addr);
            match entry.state {
                DirectoryState::UNCACHED => Next::Grant,
                DirectoryState::SHARED => {
                    if entry.in_broadcast_mode() {
                        Next::Invalidate {
                            targets: vec![],
                            broadcast: true,
                        }
                    } else {
                        let targets: Vec<TileId> = entry
                            .sharers()
                            .into_iter()
                            .filter(|&tile| tile != requester)
                            .collect();
                        if targets.is_empty() {
                            entry.clear_sharers();
                            Next::Grant
                        } else {
                            Next::Invalidate {
                                targets,
                                broadcast: false,
                            }
                        }
                    }
                }
                DirectoryState::MODIFIED => {
                    let owner = entry.owner.expect("modified entry has an owner");
                    assert_ne!(
                        owner, requester,
                        "tile {requester} write-requested {addr:#x} while owning it"
                    );
                    Next::Flush(owner)
                }
            }
        };
        match next {
            Next::Grant => {
                {
                    let entry = self.entry_mut(addr);
                    entry.clear_sharers();
                    entry.state = DirectoryState::MODIFIED;
                    entry.owner = Some(requester);
                }
                let data = self.dram.read_block(addr);
                self.send_reply(MsgKind::EX_REP, requester, addr, data);
                self.complete_transaction(addr);
            }
            Next::Invalidate { targets, broadcast } => {
                if broadcast {
                    if self.enabled {
                        self.stats.broadcasts += 1;
                    }
                    let pending = (0..self.port.num_tiles()).collect();
                    self.head_mut(addr).waiting = Some(Waiting::Acks(pending));
                    self.broadcast_to_l2(MsgKind::INV_REQ, requester, addr);
                } else {
                    if self.enabled {
                        self.stats.invalidations_sent += targets.len() as u64;
                    }
                    self.head_mut(addr).waiting =
                        Some(Waiting::Acks(targets.iter().copied().collect()));
                    for tile in targets {
                        self.send_to_l2(MsgKind::INV_REQ, tile, requester, addr);
                    }
                }
            }
            Next::Flush(owner) => {
                self.head_mut(addr).waiting = Some(Waiting::Flush(owner));
                self.send_to_l2(MsgKind::FLUSH_REQ, owner, requester, addr);
            }
        }
    }

    fn process_nullify_req(&mut self, addr: address) {
        enum Next {
            Free,
            Invalidate { targets: Vec<TileId>, broadcast: bool },
            Flush(TileId),
        }
        let next = {
            let entry = self.entry_mut(addr);
            match entry.state {
                DirectoryState::UNCACHED => Next::Free,
                DirectoryState::SHARED => {
                    if entry.in_broadcast_mode() {
                        Next::Invalidate {
                            targets: vec![],
                            broadcast: true,
                        }
                    } else if entry.num_sharers() == 0 {
                        Next::Free
                    } else {
                        Next::Invalidate {
                            targets: entry.sharers(),
                            broadcast: false,
                        }
                    }
                }
                DirectoryState::MODIFIED => {
                    Next::Flush(entry.owner.expect("modified entry has an owner"))
                }
            }
        };
        let requester = self.tile_id;
        match next {
            Next::Free => {
                self.directory.remove(addr);
                self.complete_transaction(addr);
            }
            Next::Invalidate { targets, broadcast } => {
                if broadcast {
                    if self.enabled {
                        self.stats.broadcasts += 1;
                    }
                    let pending = (0..self.port.num_tiles()).collect();
                    self.head_mut(addr).waiting = Some(Waiting::Acks(pending));
                    self.broadcast_to_l2(MsgKind::INV_REQ, requester, addr);
                } else {
                    if self.enabled {
                        self.stats.invalidations_sent += targets.len() as u64;
                    }
                    self.head_mut(addr).waiting =
                        Some(Waiting::Acks(targets.iter().copied().collect()));
                    for tile in targets {
                        self.send_to_l2(MsgKind::INV_REQ, tile, requester, addr);
                    }
                }
            }
            Next::Flush(owner) => {
                self.head_mut(addr).waiting = Some(Waiting::Flush(owner));
                self.send_to_l2(MsgKind::FLUSH_REQ, owner, requester, addr);
            }
        }
    }

    fn process_inv_rep(&mut self, sender: TileId, msg: &ShmemMsg) {
        let addr = msg.addr;
        if let Some(entry) = self.directory.get_mut(addr) {
            entry.remove_sharer(sender);
        }

        let finished = match self.queues.get_mut(&addr).and_then(VecDeque::front_mut) {
            Some(head) => match head.waiting {
                Some(Waiting::Acks(ref mut pending)) => {
                    pending.remove(&sender);
                    pending.is_empty()
                }
                // an eviction notice; the in-flight transaction is
                // waiting on something else
                _ => false,
            },
            None => false,
        };

        if finished {
            self.finish_ack_round(addr);
        } else if !self.queues.contains_key(&addr) {
            // unsolicited eviction notice: the last sharer leaving empties
            // the entry
            if let Some(entry) = self.directory.get_mut(addr) {
                if entry.state == DirectoryState::SHARED
                    && !entry.in_broadcast_mode()
                    && entry.num_sharers() == 0
                {
                    entry.state = DirectoryState::UNCACHED;
                    entry.owner = None;
                }
            }
        }
    }

    fn finish_ack_round(&mut self, addr: address) {
        let (kind, requester) = {
            let head = self.head(addr);
            (head.req.kind(), head.req.requester())
        };
        match kind {
            MsgKind::EX_REQ => {
                {
                    let entry = self.entry_mut(addr);
                    entry.clear_sharers();
                    entry.state = DirectoryState::MODIFIED;
                    entry.owner = Some(requester);
                }
                let data = self.dram.read_block(addr);
                self.send_reply(MsgKind::EX_REP, requester, addr, data);
            }
            MsgKind::NULLIFY_REQ => {
                self.directory.remove(addr);
            }
            kind => unreachable!("{kind} transaction collected invalidation acks"),
        }
        self.complete_transaction(addr);
    }

    fn process_flush_rep(&mut self, sender: TileId, msg: &ShmemMsg) {
        let addr = msg.addr;
        let data = msg.data().to_vec();
        self.dram.write_block(addr, &data);
        if self.enabled {
            self.stats.writebacks += 1;
        }

        enum After {
            ExGrant(TileId),
            ShGrant(TileId),
            Nullify,
            Unsolicited,
        }
        let after = match self.queues.get(&addr).and_then(VecDeque::front) {
            Some(head) => match &head.waiting {
                Some(Waiting::Flush(owner)) if *owner == sender => match head.req.kind() {
                    MsgKind::EX_REQ => After::ExGrant(head.req.requester()),
                    MsgKind::NULLIFY_REQ => After::Nullify,
                    kind => unreachable!("{kind} transaction waited for a flush"),
                },
                // the owner evicted the block before the copy-back request
                // reached it; the eviction flush satisfies the read
                Some(Waiting::CopyBack(owner)) if *owner == sender => {
                    After::ShGrant(head.req.requester())
                }
                _ => After::Unsolicited,
            },
            None => After::Unsolicited,
        };

        match after {
            After::ExGrant(requester) => {
                {
                    let entry = self.entry_mut(addr);
                    entry.clear_sharers();
                    entry.state = DirectoryState::MODIFIED;
                    entry.owner = Some(requester);
                }
                self.send_reply(MsgKind::EX_REP, requester, addr, data);
                self.complete_transaction(addr);
            }
            After::ShGrant(requester) => {
                {
                    let entry = self.entry_mut(addr);
                    entry.clear_sharers();
                    entry.add_sharer(requester);
                    entry.state = DirectoryState::SHARED;
                    entry.owner = None;
                }
                self.send_reply(MsgKind::SH_REP, requester, addr, data);
                self.complete_transaction(addr);
            }
            After::Nullify => {
                self.directory.remove(addr);
                self.complete_transaction(addr);
            }
            After::Unsolicited => {
                // dirty eviction notice from the owner
                if let Some(entry) = self.directory.get_mut(addr) {
                    if entry.owner == Some(sender) {
                        entry.owner = None;
                        entry.clear_sharers();
                        entry.state = DirectoryState::UNCACHED;
                    }
                }
            }
        }
    }

    fn process_wb_rep(&mut self, sender: TileId, msg: &ShmemMsg) {
        let addr = msg.addr;
        let data = msg.data().to_vec();
        self.dram.write_block(addr, &data);
        if self.enabled {
            self.stats.writebacks += 1;
        }

        let head = self
            .queues
            .get(&addr)
            .and_then(VecDeque::front)
            .unwrap_or_else(|| panic!("unexpected WB_REP for {addr:#x} with no transaction in flight"));
        let requester = match &head.waiting {
            Some(Waiting::CopyBack(owner)) if *owner == sender => head.req.requester(),
            _ => panic!("unexpected WB_REP for {addr:#x} from tile {sender}"),
        };

        {
            let entry = self.entry_mut(addr);
            // the owner keeps a shared copy alongside the requester
            entry.clear_sharers();
            entry.add_sharer(sender);
            entry.add_sharer(requester);
            entry.state = DirectoryState::SHARED;
            entry.owner = None;
        }
        self.send_reply(MsgKind::SH_REP, requester, addr, data);
        self.complete_transaction(addr);
    }

    fn complete_transaction(&mut self, addr: address) {
        let queue = self
            .queues
            .get_mut(&addr)
            .expect("completed transaction has a queue");
        queue.pop_front();
        if queue.is_empty() {
            self.queues.shift_remove(&addr);
        } else {
            self.process_head(addr);
        }
        // completion may have freed an entry or a set way
        self.retry_slot_waiters();
    }

    fn retry_slot_waiters(&mut self) {
        if self.slot_waiters.is_empty() {
            return;
        }
        let waiters = std::mem::take(&mut self.slot_waiters);
        for addr in waiters {
            let stalled = matches!(
                self.queues.get(&addr).and_then(VecDeque::front),
                Some(Transaction {
                    waiting: Some(Waiting::Slot),
                    ..
                })
            );
            if stalled {
                self.head_mut(addr).waiting = None;
                self.process_head(addr);
            }
        }
    }

    fn head(&self, addr: address) -> &Transaction {
        self.queues
            .get(&addr)
            .and_then(VecDeque::front)
            .expect("transaction in flight")
    }

    fn head_mut(&mut self, addr: address) -> &mut Transaction {
        self.queues
            .get_mut(&addr)
            .and_then(VecDeque::front_mut)
            .expect("transaction in flight")
    }

    fn entry_mut(&mut self, addr: address) -> &mut DirectoryEntry {
        self.directory
            .get_mut(addr)
            .unwrap_or_else(|| panic!("no directory entry for in-flight transaction {addr:#x}"))
    }

    fn send_reply(&mut self, kind: MsgKind, requester: TileId, addr: address, data: Vec<u8>) {
        let msg = ShmemMsg::new(
            kind,
            MemComponent::DRAM_DIR,
            MemComponent::L2_CACHE,
            requester,
            addr,
            data,
        );
        self.port.send_msg(requester, msg);
    }

    fn send_to_l2(&mut self, kind: MsgKind, dest: TileId, requester: TileId, addr: address) {
        let msg = ShmemMsg::new(
            kind,
            MemComponent::DRAM_DIR,
            MemComponent::L2_CACHE,
            requester,
            addr,
            vec![],
        );
        self.port.send_msg(dest, msg);
    }

    fn broadcast_to_l2(&mut self, kind: MsgKind, requester: TileId, addr: address) {
        let msg = ShmemMsg::new(
            kind,
            MemComponent::DRAM_DIR,
            MemComponent::L2_CACHE,
            requester,
            addr,
            vec![],
        );
        self.port.broadcast_msg(msg);
    }
}
