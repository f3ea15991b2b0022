//! Downlink and multicast group interfaces.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::lorawan::Eui64;
use crate::model::MulticastGroup;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Device not found: {0}")]
    DeviceNotFound(Eui64),

    #[error("Network server RPC failed: {0}")]
    Rpc(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MulticastError {
    #[error("Multicast group or membership does not exist")]
    DoesNotExist,

    #[error("Multicast group or membership already exists")]
    AlreadyExists,

    #[error("Network server RPC failed: {0}")]
    Rpc(String),
}

/// Enqueues application payloads on device and multicast downlink queues.
///
/// Implementations resolve frame counters and encrypt the payload with the
/// device (or group) session key before handing it to the network server.
#[async_trait]
pub trait DownlinkDispatcher: Send + Sync {
    /// Returns the frame counter used for the downlink.
    async fn enqueue_downlink(
        &self,
        dev_eui: Eui64,
        confirmed: bool,
        f_port: u8,
        payload: &[u8],
    ) -> Result<u32, DispatchError>;

    /// Enqueue `payloads` in order. Returns one frame counter per payload.
    async fn enqueue_multicast(
        &self,
        multicast_group_id: Uuid,
        f_port: u8,
        payloads: &[Vec<u8>],
    ) -> Result<Vec<u32>, DispatchError>;
}

/// Multicast group lifecycle and membership on the network server.
#[async_trait]
pub trait MulticastGroupManager: Send + Sync {
    /// Create the group. The manager assigns and returns its id.
    async fn create_multicast_group(&self, group: &MulticastGroup) -> Result<Uuid, MulticastError>;

    async fn get_multicast_group(&self, id: Uuid) -> Result<MulticastGroup, MulticastError>;

    async fn delete_multicast_group(&self, id: Uuid) -> Result<(), MulticastError>;

    /// `AlreadyExists` when the device is already a member.
    async fn add_device_to_multicast_group(
        &self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> Result<(), MulticastError>;

    /// `DoesNotExist` when the device is not a member.
    async fn remove_device_from_multicast_group(
        &self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> Result<(), MulticastError>;
}
