//! In-memory multicast group manager.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::traits::{MulticastError, MulticastGroupManager};
use crate::lorawan::Eui64;
use crate::model::MulticastGroup;

#[derive(Debug, Default)]
struct Groups {
    groups: HashMap<Uuid, MulticastGroup>,
    members: HashMap<Uuid, BTreeSet<Eui64>>,
}

/// Multicast groups kept in process memory. Clones share the same groups.
#[derive(Debug, Clone, Default)]
pub struct MemoryMulticastGroups {
    inner: Arc<Mutex<Groups>>,
}

impl MemoryMulticastGroups {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Groups> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current members of a group, empty when the group does not exist.
    pub fn members(&self, id: Uuid) -> Vec<Eui64> {
        self.lock()
            .members
            .get(&id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MulticastGroupManager for MemoryMulticastGroups {
    async fn create_multicast_group(&self, group: &MulticastGroup) -> Result<Uuid, MulticastError> {
        let mut g = self.lock();
        let id = Uuid::new_v4();
        let mut group = group.clone();
        group.id = id;
        tracing::debug!(id = %id, name = %group.name, mc_addr = %group.mc_addr, "Multicast group created");
        g.groups.insert(id, group);
        g.members.insert(id, BTreeSet::new());
        Ok(id)
    }

    async fn get_multicast_group(&self, id: Uuid) -> Result<MulticastGroup, MulticastError> {
        self.lock()
            .groups
            .get(&id)
            .cloned()
            .ok_or(MulticastError::DoesNotExist)
    }

    async fn delete_multicast_group(&self, id: Uuid) -> Result<(), MulticastError> {
        let mut g = self.lock();
        g.members.remove(&id);
        g.groups
            .remove(&id)
            .map(|_| ())
            .ok_or(MulticastError::DoesNotExist)
    }

    async fn add_device_to_multicast_group(
        &self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> Result<(), MulticastError> {
        let mut g = self.lock();
        let members = g.members.get_mut(&id).ok_or(MulticastError::DoesNotExist)?;
        if !members.insert(dev_eui) {
            return Err(MulticastError::AlreadyExists);
        }
        Ok(())
    }

    async fn remove_device_from_multicast_group(
        &self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> Result<(), MulticastError> {
        let mut g = self.lock();
        let members = g.members.get_mut(&id).ok_or(MulticastError::DoesNotExist)?;
        if !members.remove(&dev_eui) {
            return Err(MulticastError::DoesNotExist);
        }
        Ok(())
    }
}
