//! In-memory store.
//!
//! Transactions take an owned lock on the whole table set, so they are
//! serialized and the skip-locked rule of the pending queries holds
//! trivially. Each transaction keeps a snapshot and restores it unless it
//! commits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::traits::{Store, StoreError, StoreTx};
use crate::lorawan::Eui64;
use crate::model::{
    DeviceKeys, DeviceState, FuotaDeployment, FuotaDeploymentDevice, RemoteFragmentationSession,
    RemoteMulticastClassCSession, RemoteMulticastSetup, RemoteState,
};
use crate::state::DeploymentState;

const MULTICAST_SETUP_FAILED: &str = "The device failed to provision the remote multicast setup.";
const FRAGMENTATION_SESSION_FAILED: &str =
    "The device failed to provision the fragmentation session setup.";
const DEPLOYMENT_INCOMPLETE: &str = "Device did not complete the FUOTA deployment or did not confirm that it completed the FUOTA deployment.";

#[derive(Debug, Default, Clone)]
struct Tables {
    devices: BTreeMap<Eui64, DeviceKeys>,
    deployments: BTreeMap<Uuid, FuotaDeployment>,
    deployment_devices: BTreeMap<(Uuid, Eui64), FuotaDeploymentDevice>,
    multicast_setups: BTreeMap<(Eui64, Uuid), RemoteMulticastSetup>,
    class_c_sessions: BTreeMap<(Eui64, Uuid), RemoteMulticastClassCSession>,
    fragmentation_sessions: BTreeMap<(Eui64, u8), RemoteFragmentationSession>,
}

impl Tables {
    /// Provisioned SETUP multicast setup rows of a device.
    fn provisioned_setups(&self, dev_eui: Eui64) -> impl Iterator<Item = &RemoteMulticastSetup> {
        self.multicast_setups
            .values()
            .filter(move |s| s.dev_eui == dev_eui)
            .filter(|s| s.state == RemoteState::Setup && s.provisioning.state_provisioned)
    }

    fn fail_pending_devices<F>(
        &mut self,
        id: Uuid,
        message: &str,
        mut failed: F,
    ) -> Vec<FuotaDeploymentDevice>
    where
        F: FnMut(&Tables, Eui64) -> bool,
    {
        let tables: &Tables = self;
        let targets: Vec<(Uuid, Eui64)> = tables
            .deployment_devices
            .iter()
            .filter(|((dep, _), d)| *dep == id && d.state == DeviceState::Pending)
            .filter(|((_, dev_eui), _)| failed(tables, *dev_eui))
            .map(|(key, _)| *key)
            .collect();

        let mut updated = Vec::with_capacity(targets.len());
        for key in targets {
            if let Some(d) = self.deployment_devices.get_mut(&key) {
                d.state = DeviceState::Error;
                d.error_message = message.to_string();
                updated.push(d.clone());
            }
        }
        updated
    }
}

fn insert_new<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> Result<(), StoreError> {
    if map.contains_key(&key) {
        return Err(StoreError::AlreadyExists);
    }
    map.insert(key, value);
    Ok(())
}

fn replace<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> Result<(), StoreError> {
    match map.get_mut(&key) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(StoreError::DoesNotExist),
    }
}

fn remove<K: Ord, V>(map: &mut BTreeMap<K, V>, key: &K) -> Result<(), StoreError> {
    map.remove(key).map(|_| ()).ok_or(StoreError::DoesNotExist)
}

/// Store backed by process memory. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with a serialization failure, rolling
    /// their transaction back.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            snapshot: Some(snapshot),
            store: self.clone(),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    /// State at `begin`, restored on drop unless committed.
    snapshot: Option<Tables>,
    store: MemoryStore,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn create_device_keys(&mut self, keys: &DeviceKeys) -> Result<(), StoreError> {
        insert_new(&mut self.guard.devices, keys.dev_eui, keys.clone())
    }

    async fn get_device_keys_for_fuota_deployment(
        &mut self,
        id: Uuid,
    ) -> Result<Vec<DeviceKeys>, StoreError> {
        let t = &*self.guard;
        Ok(t.deployment_devices
            .keys()
            .filter(|(dep, _)| *dep == id)
            .filter_map(|(_, dev_eui)| t.devices.get(dev_eui).cloned())
            .collect())
    }

    async fn get_service_profile_id_for_fuota_deployment(
        &mut self,
        id: Uuid,
    ) -> Result<Uuid, StoreError> {
        let t = &*self.guard;
        t.deployment_devices
            .keys()
            .filter(|(dep, _)| *dep == id)
            .find_map(|(_, dev_eui)| t.devices.get(dev_eui))
            .map(|d| d.service_profile_id)
            .ok_or(StoreError::DoesNotExist)
    }

    async fn create_fuota_deployment(
        &mut self,
        deployment: &FuotaDeployment,
        dev_euis: &[Eui64],
    ) -> Result<(), StoreError> {
        let t = &mut *self.guard;
        insert_new(&mut t.deployments, deployment.id, deployment.clone())?;
        for dev_eui in dev_euis {
            insert_new(
                &mut t.deployment_devices,
                (deployment.id, *dev_eui),
                FuotaDeploymentDevice::pending(deployment.id, *dev_eui),
            )?;
        }
        Ok(())
    }

    async fn get_fuota_deployment(&mut self, id: Uuid) -> Result<FuotaDeployment, StoreError> {
        self.guard
            .deployments
            .get(&id)
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_pending_fuota_deployments(
        &mut self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<FuotaDeployment>, StoreError> {
        let mut items: Vec<FuotaDeployment> = self
            .guard
            .deployments
            .values()
            .filter(|d| d.state != DeploymentState::Done && d.next_step_after <= now)
            .cloned()
            .collect();
        items.sort_by_key(|d| d.next_step_after);
        items.truncate(batch_size);
        Ok(items)
    }

    async fn update_fuota_deployment(
        &mut self,
        deployment: &FuotaDeployment,
    ) -> Result<(), StoreError> {
        replace(
            &mut self.guard.deployments,
            deployment.id,
            deployment.clone(),
        )
    }

    async fn get_fuota_deployment_devices(
        &mut self,
        id: Uuid,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError> {
        Ok(self
            .guard
            .deployment_devices
            .values()
            .filter(|d| d.fuota_deployment_id == id)
            .cloned()
            .collect())
    }

    async fn get_fuota_deployment_device(
        &mut self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> Result<FuotaDeploymentDevice, StoreError> {
        self.guard
            .deployment_devices
            .get(&(id, dev_eui))
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_pending_fuota_deployment_device(
        &mut self,
        dev_eui: Eui64,
    ) -> Result<FuotaDeploymentDevice, StoreError> {
        self.guard
            .deployment_devices
            .values()
            .find(|d| d.dev_eui == dev_eui && d.state == DeviceState::Pending)
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn update_fuota_deployment_device(
        &mut self,
        device: &FuotaDeploymentDevice,
    ) -> Result<(), StoreError> {
        replace(
            &mut self.guard.deployment_devices,
            (device.fuota_deployment_id, device.dev_eui),
            device.clone(),
        )
    }

    async fn set_from_remote_multicast_setup(
        &mut self,
        id: Uuid,
        multicast_group_id: Uuid,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError> {
        Ok(self
            .guard
            .fail_pending_devices(id, MULTICAST_SETUP_FAILED, |t, dev_eui| {
                t.multicast_setups
                    .get(&(dev_eui, multicast_group_id))
                    .is_some_and(|s| !s.provisioning.state_provisioned)
            }))
    }

    async fn set_from_remote_fragmentation_session(
        &mut self,
        id: Uuid,
        frag_index: u8,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError> {
        Ok(self
            .guard
            .fail_pending_devices(id, FRAGMENTATION_SESSION_FAILED, |t, dev_eui| {
                t.fragmentation_sessions
                    .get(&(dev_eui, frag_index))
                    .is_some_and(|s| !s.provisioning.state_provisioned)
            }))
    }

    async fn set_incomplete_fuota_deployment(
        &mut self,
        id: Uuid,
    ) -> Result<Vec<FuotaDeploymentDevice>, StoreError> {
        Ok(self
            .guard
            .fail_pending_devices(id, DEPLOYMENT_INCOMPLETE, |_, _| true))
    }

    async fn create_remote_multicast_setup(
        &mut self,
        setup: &RemoteMulticastSetup,
    ) -> Result<(), StoreError> {
        insert_new(
            &mut self.guard.multicast_setups,
            (setup.dev_eui, setup.multicast_group_id),
            setup.clone(),
        )
    }

    async fn get_remote_multicast_setup(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<RemoteMulticastSetup, StoreError> {
        self.guard
            .multicast_setups
            .get(&(dev_eui, multicast_group_id))
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_remote_multicast_setup_by_group_id(
        &mut self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> Result<RemoteMulticastSetup, StoreError> {
        self.guard
            .multicast_setups
            .values()
            .find(|s| s.dev_eui == dev_eui && s.mc_group_id == mc_group_id)
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_pending_remote_multicast_setups(
        &mut self,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<RemoteMulticastSetup>, StoreError> {
        Ok(self
            .guard
            .multicast_setups
            .values()
            .filter(|s| s.provisioning.is_pending(max_retry, now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_remote_multicast_setup(
        &mut self,
        setup: &RemoteMulticastSetup,
    ) -> Result<(), StoreError> {
        replace(
            &mut self.guard.multicast_setups,
            (setup.dev_eui, setup.multicast_group_id),
            setup.clone(),
        )
    }

    async fn delete_remote_multicast_setup(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<(), StoreError> {
        remove(
            &mut self.guard.multicast_setups,
            &(dev_eui, multicast_group_id),
        )
    }

    async fn get_dev_euis_with_multicast_setup(
        &mut self,
        multicast_group_id: Uuid,
    ) -> Result<Vec<Eui64>, StoreError> {
        Ok(self
            .guard
            .multicast_setups
            .values()
            .filter(|s| s.multicast_group_id == multicast_group_id)
            .filter(|s| s.state == RemoteState::Setup && s.provisioning.state_provisioned)
            .map(|s| s.dev_eui)
            .collect())
    }

    async fn get_dev_euis_with_fragmentation_session_setup(
        &mut self,
        multicast_group_id: Uuid,
        frag_index: u8,
    ) -> Result<Vec<Eui64>, StoreError> {
        let t = &*self.guard;
        Ok(t.multicast_setups
            .values()
            .filter(|s| s.multicast_group_id == multicast_group_id)
            .filter(|s| s.state == RemoteState::Setup && s.provisioning.state_provisioned)
            .filter(|s| {
                t.fragmentation_sessions
                    .get(&(s.dev_eui, frag_index))
                    .is_some_and(|f| {
                        f.state == RemoteState::Setup && f.provisioning.state_provisioned
                    })
            })
            .map(|s| s.dev_eui)
            .collect())
    }

    async fn create_remote_multicast_class_c_session(
        &mut self,
        session: &RemoteMulticastClassCSession,
    ) -> Result<(), StoreError> {
        insert_new(
            &mut self.guard.class_c_sessions,
            (session.dev_eui, session.multicast_group_id),
            session.clone(),
        )
    }

    async fn get_remote_multicast_class_c_session(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<RemoteMulticastClassCSession, StoreError> {
        self.guard
            .class_c_sessions
            .get(&(dev_eui, multicast_group_id))
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_remote_multicast_class_c_session_by_group_id(
        &mut self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> Result<RemoteMulticastClassCSession, StoreError> {
        self.guard
            .class_c_sessions
            .values()
            .find(|s| s.dev_eui == dev_eui && s.mc_group_id == mc_group_id)
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_pending_remote_multicast_class_c_sessions(
        &mut self,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<RemoteMulticastClassCSession>, StoreError> {
        let t = &*self.guard;
        Ok(t.class_c_sessions
            .values()
            .filter(|s| s.provisioning.is_pending(max_retry, now))
            .filter(|s| {
                t.multicast_setups
                    .get(&(s.dev_eui, s.multicast_group_id))
                    .is_some_and(|m| {
                        m.mc_group_id == s.mc_group_id
                            && m.state == RemoteState::Setup
                            && m.provisioning.state_provisioned
                    })
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_remote_multicast_class_c_session(
        &mut self,
        session: &RemoteMulticastClassCSession,
    ) -> Result<(), StoreError> {
        replace(
            &mut self.guard.class_c_sessions,
            (session.dev_eui, session.multicast_group_id),
            session.clone(),
        )
    }

    async fn delete_remote_multicast_class_c_session(
        &mut self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> Result<(), StoreError> {
        remove(
            &mut self.guard.class_c_sessions,
            &(dev_eui, multicast_group_id),
        )
    }

    async fn delete_remote_multicast_records(
        &mut self,
        multicast_group_id: Uuid,
    ) -> Result<usize, StoreError> {
        let t = &mut *self.guard;
        let before = t.multicast_setups.len() + t.class_c_sessions.len();
        t.multicast_setups
            .retain(|(_, group), _| *group != multicast_group_id);
        t.class_c_sessions
            .retain(|(_, group), _| *group != multicast_group_id);
        Ok(before - t.multicast_setups.len() - t.class_c_sessions.len())
    }

    async fn create_remote_fragmentation_session(
        &mut self,
        session: &RemoteFragmentationSession,
    ) -> Result<(), StoreError> {
        insert_new(
            &mut self.guard.fragmentation_sessions,
            (session.dev_eui, session.frag_index),
            session.clone(),
        )
    }

    async fn get_remote_fragmentation_session(
        &mut self,
        dev_eui: Eui64,
        frag_index: u8,
    ) -> Result<RemoteFragmentationSession, StoreError> {
        self.guard
            .fragmentation_sessions
            .get(&(dev_eui, frag_index))
            .cloned()
            .ok_or(StoreError::DoesNotExist)
    }

    async fn get_pending_remote_fragmentation_sessions(
        &mut self,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<RemoteFragmentationSession>, StoreError> {
        let t = &*self.guard;
        Ok(t.fragmentation_sessions
            .values()
            .filter(|s| s.provisioning.is_pending(max_retry, now))
            .filter(|s| {
                s.mc_group_ids.is_empty()
                    || t.provisioned_setups(s.dev_eui)
                        .any(|m| s.mc_group_ids.contains(&m.mc_group_id))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_remote_fragmentation_session(
        &mut self,
        session: &RemoteFragmentationSession,
    ) -> Result<(), StoreError> {
        replace(
            &mut self.guard.fragmentation_sessions,
            (session.dev_eui, session.frag_index),
            session.clone(),
        )
    }

    async fn delete_remote_fragmentation_session(
        &mut self,
        dev_eui: Eui64,
        frag_index: u8,
    ) -> Result<(), StoreError> {
        remove(
            &mut self.guard.fragmentation_sessions,
            &(dev_eui, frag_index),
        )
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        if tx.store.take_commit_failure() {
            // dropping restores the snapshot
            return Err(StoreError::SerializationFailure);
        }
        tx.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::{Aes128Key, DevAddr};
    use crate::model::Provisioning;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn eui(b: u8) -> Eui64 {
        Eui64([b; 8])
    }

    fn setup(dev_eui: Eui64, group: Uuid, provisioned: bool) -> RemoteMulticastSetup {
        let mut provisioning = Provisioning::new(Duration::from_secs(10), now());
        provisioning.state_provisioned = provisioned;
        RemoteMulticastSetup {
            dev_eui,
            multicast_group_id: group,
            mc_group_id: 0,
            mc_addr: DevAddr([1, 2, 3, 4]),
            mc_key_encrypted: Aes128Key::default(),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
            state: RemoteState::Setup,
            provisioning,
        }
    }

    fn frag_session(dev_eui: Eui64, mc_group_ids: Vec<u8>) -> RemoteFragmentationSession {
        RemoteFragmentationSession {
            dev_eui,
            frag_index: 0,
            mc_group_ids,
            nb_frag: 3,
            frag_size: 10,
            fragmentation_matrix: 0,
            block_ack_delay: 0,
            padding: 7,
            descriptor: [0; 4],
            state: RemoteState::Setup,
            provisioning: Provisioning::new(Duration::from_secs(10), now()),
        }
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), group, false))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_remote_multicast_setup(eui(1), group).await.is_ok());
    }

    #[tokio::test]
    async fn test_rollback_and_drop_restore() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), group, false))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.create_remote_multicast_setup(&setup(eui(2), group, false))
                .await
                .unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.get_remote_multicast_setup(eui(1), group).await,
            Err(StoreError::DoesNotExist)
        );
        assert_eq!(
            tx.get_remote_multicast_setup(eui(2), group).await,
            Err(StoreError::DoesNotExist)
        );
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let group = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), group, false))
            .await
            .unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_remote_multicast_setup(eui(1), group).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), group, false))
            .await
            .unwrap();
        assert_eq!(
            tx.create_remote_multicast_setup(&setup(eui(1), group, false))
                .await,
            Err(StoreError::AlreadyExists)
        );
    }

    #[tokio::test]
    async fn test_pending_setups_respect_retry_limit() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let mut exhausted = setup(eui(1), group, false);
        exhausted.provisioning.retry_count = 3;
        tx.create_remote_multicast_setup(&exhausted).await.unwrap();
        tx.create_remote_multicast_setup(&setup(eui(2), group, false))
            .await
            .unwrap();
        tx.create_remote_multicast_setup(&setup(eui(3), group, true))
            .await
            .unwrap();

        let pending = tx
            .get_pending_remote_multicast_setups(10, 3, now())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].dev_eui, eui(2));
    }

    #[tokio::test]
    async fn test_fragmentation_session_gating() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        tx.create_remote_fragmentation_session(&frag_session(eui(1), vec![0]))
            .await
            .unwrap();
        tx.create_remote_fragmentation_session(&frag_session(eui(2), vec![]))
            .await
            .unwrap();

        let pending = tx
            .get_pending_remote_fragmentation_sessions(10, 3, now())
            .await
            .unwrap();
        assert_eq!(
            pending.iter().map(|s| s.dev_eui).collect::<Vec<_>>(),
            vec![eui(2)]
        );

        tx.create_remote_multicast_setup(&setup(eui(1), group, true))
            .await
            .unwrap();
        let pending = tx
            .get_pending_remote_fragmentation_sessions(10, 3, now())
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_reconciliation_messages() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();
        let deployment = FuotaDeployment::new("fw", vec![1], now());
        let mut tx = store.begin().await.unwrap();

        tx.create_fuota_deployment(&deployment, &[eui(1), eui(2), eui(3)])
            .await
            .unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), group, false))
            .await
            .unwrap();
        tx.create_remote_multicast_setup(&setup(eui(2), group, true))
            .await
            .unwrap();
        tx.create_remote_fragmentation_session(&frag_session(eui(2), vec![0]))
            .await
            .unwrap();

        let failed = tx
            .set_from_remote_multicast_setup(deployment.id, group)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        let failed = tx
            .set_from_remote_fragmentation_session(deployment.id, 0)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        let failed = tx
            .set_incomplete_fuota_deployment(deployment.id)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);

        let mut messages = Vec::new();
        for d in 1..=3 {
            let device = tx
                .get_fuota_deployment_device(deployment.id, eui(d))
                .await
                .unwrap();
            assert_eq!(device.state, DeviceState::Error);
            messages.push(device.error_message);
        }
        assert_eq!(
            messages,
            vec![
                MULTICAST_SETUP_FAILED,
                FRAGMENTATION_SESSION_FAILED,
                DEPLOYMENT_INCOMPLETE
            ]
        );
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), group, true))
            .await
            .unwrap();
        tx.create_remote_multicast_setup(&setup(eui(1), other, true))
            .await
            .unwrap();
        assert_eq!(tx.delete_remote_multicast_records(group).await.unwrap(), 1);
        assert!(tx.get_remote_multicast_setup(eui(1), other).await.is_ok());
    }
}
