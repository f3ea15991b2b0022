//! Network-server collaborators.
//!
//! Defines the downlink dispatcher and multicast group manager the core
//! calls into, with in-memory implementations for tests and dry runs.

pub mod memory;
pub mod mock;
pub mod traits;

pub use memory::MemoryMulticastGroups;
pub use mock::{Downlink, MulticastDownlink, RecordingDispatcher};
pub use traits::{DispatchError, DownlinkDispatcher, MulticastError, MulticastGroupManager};
