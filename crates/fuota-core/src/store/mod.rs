//! Persistent store.
//!
//! All coordination between the loops and the uplink handlers happens
//! through the store. Every unit of work runs in one [`StoreTx`], committed
//! on success and rolled back on error.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{Store, StoreError, StoreTx, finish};
