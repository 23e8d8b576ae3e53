//! Key/value persistence backing the saga state log.
//!
//! The recorder only needs whole-document reads and writes, so backends are
//! plain async key/value stores holding JSON bytes.

mod file;
mod memory;
mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{StateStore, StateStoreExt, StoreError};
