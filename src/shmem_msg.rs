use crate::{address, TileId};

/// Logical memory-hierarchy components that exchange coherence messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum MemComponent {
    L1_ICACHE,
    L1_DCACHE,
    COMPANION_L1_ICACHE,
    COMPANION_L1_DCACHE,
    L2_CACHE,
    DRAM_DIR,
}

/// Coherence message kinds.
///
/// `*_REQ` flow towards the per-block serialization point or from a
/// directory to a sharer; `*_REP` flow back. Only replies carry block data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum MsgKind {
    /// exclusive (write) miss
    EX_REQ,
    /// shared (read) miss
    SH_REQ,
    /// drop a cached copy
    INV_REQ,
    /// drop a cached copy and return the dirty data
    FLUSH_REQ,
    /// return the dirty data but keep a shared copy
    WB_REQ,
    /// directory entry eviction, local to the home tile
    NULLIFY_REQ,
    EX_REP,
    SH_REP,
    INV_REP,
    FLUSH_REP,
    WB_REP,
}

impl MsgKind {
    #[must_use]
    pub fn carries_data(self) -> bool {
        matches!(
            self,
            MsgKind::EX_REP | MsgKind::SH_REP | MsgKind::FLUSH_REP | MsgKind::WB_REP
        )
    }
}

/// An immutable, value-copied coherence message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmemMsg {
    pub kind: MsgKind,
    pub sender_component: MemComponent,
    pub receiver_component: MemComponent,
    /// Tile whose memory operation started the transaction.
    pub requester: TileId,
    pub addr: address,
    data: Vec<u8>,
}

impl ShmemMsg {
    #[must_use]
    pub fn new(
        kind: MsgKind,
        sender_component: MemComponent,
        receiver_component: MemComponent,
        requester: TileId,
        addr: address,
        data: Vec<u8>,
    ) -> Self {
        assert_eq!(
            kind.carries_data(),
            !data.is_empty(),
            "{kind} message for {addr:#x}: payload must be present iff the kind carries data"
        );
        Self {
            kind,
            sender_component,
            receiver_component,
            requester,
            addr,
            data,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Display for ShmemMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{:#x} {}->{} (requester {})",
            self.kind, self.addr, self.sender_component, self.receiver_component, self.requester
        )
    }
}

/// Owned snapshot of a request taken when it goes in flight against a
/// directory entry; queued behind it are later conflicting requests for
/// the same block. Requests never carry data payloads.
#[derive(Debug, Clone)]
pub struct ShmemReq {
    msg: ShmemMsg,
}

impl ShmemReq {
    #[must_use]
    pub fn new(msg: &ShmemMsg) -> Self {
        assert!(
            !msg.has_data(),
            "shmem requests must not have data payloads ({msg})"
        );
        Self { msg: msg.clone() }
    }

    #[must_use]
    pub fn kind(&self) -> MsgKind {
        self.msg.kind
    }

    #[must_use]
    pub fn requester(&self) -> TileId {
        self.msg.requester
    }

    #[must_use]
    pub fn addr(&self) -> address {
        self.msg.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_carry_data() {
        let msg = ShmemMsg::new(
            MsgKind::SH_REP,
            MemComponent::DRAM_DIR,
            MemComponent::L2_CACHE,
            1,
            0x40,
            vec![0; 64],
        );
        assert!(msg.has_data());
        assert_eq!(msg.data().len(), 64);
    }

    #[test]
    #[should_panic(expected = "payload must be present iff the kind carries data")]
    fn request_with_payload_is_fatal() {
        let _ = ShmemMsg::new(
            MsgKind::SH_REQ,
            MemComponent::L2_CACHE,
            MemComponent::DRAM_DIR,
            0,
            0x40,
            vec![0; 64],
        );
    }

    #[test]
    #[should_panic(expected = "payload must be present iff the kind carries data")]
    fn reply_without_payload_is_fatal() {
        let _ = ShmemMsg::new(
            MsgKind::EX_REP,
            MemComponent::DRAM_DIR,
            MemComponent::L2_CACHE,
            0,
            0x40,
            vec![],
        );
    }

    #[test]
    #[should_panic(expected = "must not have data payloads")]
    fn in_flight_snapshot_rejects_payload() {
        let msg = ShmemMsg::new(
            MsgKind::FLUSH_REP,
            MemComponent::L2_CACHE,
            MemComponent::DRAM_DIR,
            0,
            0x40,
            vec![1; 64],
        );
        let _ = ShmemReq::new(&msg);
    }
}
