#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::too_many_arguments,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod dram;
pub mod home_lookup;
pub mod l1;
pub mod l2;
pub mod lock;
pub mod memory_manager;
pub mod network;
pub mod perf;
pub mod shmem_msg;
pub mod sim;
pub mod sync;

pub type address = u64;

/// Identifier of a simulated tile.
pub type TileId = usize;

/// The two logical execution contexts sharing one tile's cache hierarchy.
///
/// Both contexts are coherence-symmetric: the shared L2 and the home
/// directories see one unified view of the tile. Serialization between them
/// is mediated by the tile's cross-context token, not by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Context {
    Main,
    Companion,
}

impl Context {
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Context::Main => 0,
            Context::Companion => 1,
        }
    }
}
