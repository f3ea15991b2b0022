//! FUOTA-Core: LoRaWAN firmware update over the air orchestration in Rust.
//!
//! This crate drives firmware deployments to fleets of LoRaWAN devices
//! using the Remote Multicast Setup, Fragmented Data Block Transport and
//! Application Layer Clock Synchronization application layer packages.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Applayer**: Binary codecs for the three application layer packages
//! - **Crypto**: Multicast key derivation and McKey wrapping
//! - **Payload**: Firmware padding and forward error correction fragments
//! - **Store**: Transactional persistence of deployments and remote records
//! - **Dispatch**: Downlink queue and multicast group abstraction
//! - **State**: Deployment state machine and step handlers
//! - **Sync**: Retry loops keeping remote records in sync with devices
//! - **Uplink**: Handlers for device answers
//! - **Scheduler**: Background loops driving all of the above
//! - **Events**: Observer pattern for progress reporting
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fuota_core::{Config, MemoryMulticastGroups, MemoryStore, RecordingDispatcher, Services};
//!
//! # async fn run() {
//! let services = Services::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(RecordingDispatcher::new()),
//!     Arc::new(MemoryMulticastGroups::new()),
//! );
//! let cancel = fuota_core::scheduler::start(&Config::default(), services);
//! cancel.cancel();
//! # }
//! ```

pub mod applayer;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod events;
pub mod gps;
pub mod lorawan;
pub mod model;
pub mod payload;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
pub mod uplink;

#[cfg(test)]
mod testutil;

// Re-exports for convenience
pub use applayer::CodecError;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, FuotaDeploymentConfig, SyncConfig};
pub use dispatch::{
    DispatchError, DownlinkDispatcher, MemoryMulticastGroups, MulticastError,
    MulticastGroupManager, RecordingDispatcher,
};
pub use events::{CollectingObserver, FuotaEvent, FuotaObserver, NullObserver, TracingObserver};
pub use lorawan::{Aes128Key, DevAddr, Eui64};
pub use model::{
    DeviceKeys, DeviceState, FuotaDeployment, FuotaDeploymentDevice, GroupType, MulticastGroup,
};
pub use payload::FirmwareImage;
pub use services::Services;
pub use state::{DeploymentState, process_batch};
pub use store::{MemoryStore, Store, StoreError, StoreTx};
pub use uplink::{UplinkError, handle_uplink};
