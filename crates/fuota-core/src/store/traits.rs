//! Store abstraction.
//!
//! Defines the `Store` / `StoreTx` traits the loops and handlers run
//! against, allowing different backends (in-memory, SQL, ...).

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::lorawan::Eui64;
use crate::model::{
    DeviceKeys, FuotaDeployment, FuotaDeploymentDevice, RemoteFragmentationSession,
    RemoteMulticastClassCSession, RemoteMulticastSetup,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Object does not exist")]
    DoesNotExist,

    #[error("Object already exists")]
    AlreadyExists,

    /// The transaction conflicted with a concurrent one and may be retried.
    #[error("Serialization failure")]
    SerializationFailure,

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SerializationFailure)
    }
}

/// Whether any cause in the chain is a retryable store conflict.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<StoreError>())
        .any(StoreError::is_retryable)
}

/// Opens transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// One serializable transaction.
///
/// `get_pending_*` queries lock the returned rows; rows locked by another
/// transaction are skipped rather than waited for.
#[async_trait]
pub trait StoreTx: Send {
    // Devices

    async fn create_device_keys(&mut self, keys: &DeviceKeys) -> Result<(), StoreError>;

    /// Keys of every device bound to the deployment.
    async fn get_device_keys_for_fuota_deployment(
        &mut self,
        id: Uuid,
    ) -> Result<Vec<DeviceKeys>, StoreError>;

    async fn get_service_profile_id_for_fuota_deployment(
        &mut self,
        id: Uuid,
    ) -> Result<Uuid, StoreError>;

    // Deployments

    /// Create the deployment and a PENDING device row for every device.
    async fn create_fuota_deployment(
        &mut self,
        deployment: &FuotaDeployment,
        dev_euis: &[Eui64],
    ) -> Result<(), StoreError>;

    async fn get_fuota_deployment(&mut self, id: Uuid) -> Result<FuotaDeployment, StoreError>;

    /// Up to `batch_size` deployments not yet DONE whose `next_step_after`
    /// has passed.
    async fn get_pending_fuota_deployments(
        &mut self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<FuotaDeployment>, StoreError>;

    async fn update_fuota_deployment(
        &mut self,
        deployment: &FuotaDeployment,
    ) -> Result<(), StoreError>;

    async fn get_fuota_deployment_devices(
        &mut self,
        id: Uuid,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError>;

    async fn get_fuota_deployment_device(
        &mut self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> Result<FuotaDeploymentDevice, StoreError>;

    /// The device row still PENDING in any deployment.
    async fn get_pending_fuota_deployment_device(
        &mut self,
        dev_eui: Eui64,
    ) -> Result<FuotaDeploymentDevice, StoreError>;

    async fn update_fuota_deployment_device(
        &mut self,
        device: &FuotaDeploymentDevice,
    ) -> Result<(), StoreError>;

    /// Mark PENDING devices whose multicast setup for the group is still
    /// unprovisioned as ERROR. Returns the updated rows.
    async fn set_from_remote_multicast_setup(
        &mut self,
        id: Uuid,
        multicast_group_id: Uuid,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError>;

    /// Mark PENDING devices whose fragmentation session at `frag_index` is
    /// still unprovisioned as ERROR. Returns the updated rows.
    async fn set_from_remote_fragmentation_session(
        &mut self,
        id: Uuid,
        frag_index: u8,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError>;

    /// Mark every remaining PENDING device as ERROR. Returns the updated rows.
    async fn set_incomplete_fuota_deployment(
        &mut self,
        id: Uuid,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError>;

    // Remote multicast setup

    async fn create_remote_multicast_setup(
        &mut self,
        setup: &RemoteMulticastSetup,
    ) -> Result<(), StoreError>;

    async fn get_remote_multicast_setup(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<RemoteMulticastSetup, StoreError>;

    async fn get_remote_multicast_setup_by_group_id(
        &mut self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> Result<RemoteMulticastSetup, StoreError>;

    async fn get_pending_remote_multicast_setups(
        &mut self,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<RemoteMulticastSetup>, StoreError>;

    async fn update_remote_multicast_setup(
        &mut self,
        setup: &RemoteMulticastSetup,
    ) -> Result<(), StoreError>;

    async fn delete_remote_multicast_setup(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<(), StoreError>;

    /// Devices with a provisioned SETUP record for the group.
    async fn get_dev_euis_with_multicast_setup(
        &mut self,
        multicast_group_id: Uuid,
    ) -> Result<Vec<Eui64>, StoreError>;

    /// Devices with a provisioned multicast setup for the group and a
    /// provisioned SETUP fragmentation session at `frag_index`.
    async fn get_dev_euis_with_fragmentation_session_setup(
        &mut self,
        multicast_group_id: Uuid,
        frag_index: u8,
    ) -> Result<Vec<Eui64>, StoreError>;

    // Remote multicast Class-C session

    async fn create_remote_multicast_class_c_session(
        &mut self,
        session: &RemoteMulticastClassCSession,
    ) -> Result<(), StoreError>;

    async fn get_remote_multicast_class_c_session(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<RemoteMulticastClassCSession, StoreError>;

    async fn get_remote_multicast_class_c_session_by_group_id(
        &mut self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> Result<RemoteMulticastClassCSession, StoreError>;

    /// Pending sessions of devices whose multicast setup for the same group
    /// is provisioned with state SETUP.
    async fn get_pending_remote_multicast_class_c_sessions(
        &mut self,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<RemoteMulticastClassCSession>, StoreError>;

    async fn update_remote_multicast_class_c_session(
        &mut self,
        session: &RemoteMulticastClassCSession,
    ) -> Result<(), StoreError>;

    async fn delete_remote_multicast_class_c_session(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<(), StoreError>;

    /// Remove every multicast setup and Class-C session of a deleted group.
    /// Returns the number of rows removed.
    async fn delete_remote_multicast_records(
        &mut self,
        multicast_group_id: Uuid,
    ) -> Result<usize, StoreError>;

    // Remote fragmentation session

    async fn create_remote_fragmentation_session(
        &mut self,
        session: &RemoteFragmentationSession,
    ) -> Result<(), StoreError>;

    async fn get_remote_fragmentation_session(
        &mut self,
        dev_eui: Eui64,
        frag_index: u8,
    ) -> Result<RemoteFragmentationSession, StoreError>;

    /// Pending sessions that are unicast or whose device has a provisioned
    /// SETUP multicast setup on one of the session's McGroupIDs.
    async fn get_pending_remote_fragmentation_sessions(
        &mut self,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<RemoteFragmentationSession>, StoreError>;

    async fn update_remote_fragmentation_session(
        &mut self,
        session: &RemoteFragmentationSession,
    ) -> Result<(), StoreError>;

    async fn delete_remote_fragmentation_session(
        &mut self,
        dev_eui: Eui64,
        frag_index: u8,
    ) -> Result<(), StoreError>;

    // Transaction

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Commit `tx` when `result` is Ok, roll it back otherwise.
pub async fn finish<T>(tx: Box<dyn StoreTx>, result: anyhow::Result<T>) -> anyhow::Result<T> {
    match result {
        Ok(v) => {
            tx.commit().await.context("commit transaction error")?;
            Ok(v)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
