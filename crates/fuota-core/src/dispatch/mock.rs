//! Recording downlink dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::traits::{DispatchError, DownlinkDispatcher};
use crate::lorawan::Eui64;

/// A captured unicast downlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    pub dev_eui: Eui64,
    pub confirmed: bool,
    pub f_port: u8,
    pub payload: Vec<u8>,
    pub f_cnt: u32,
}

/// A captured multicast batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastDownlink {
    pub multicast_group_id: Uuid,
    pub f_port: u8,
    pub payloads: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Log {
    downlinks: Vec<Downlink>,
    multicast: Vec<MulticastDownlink>,
    f_cnt: HashMap<Eui64, u32>,
    group_f_cnt: HashMap<Uuid, u32>,
    failures: usize,
}

fn lock(log: &Mutex<Log>) -> MutexGuard<'_, Log> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatcher that captures every downlink instead of sending it.
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    log: Arc<Mutex<Log>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` enqueue calls fail with an RPC error.
    pub fn fail_next(&self, n: usize) {
        lock(&self.log).failures = n;
    }

    /// Get all captured unicast downlinks.
    pub fn downlinks(&self) -> Vec<Downlink> {
        lock(&self.log).downlinks.clone()
    }

    pub fn downlinks_for(&self, dev_eui: Eui64) -> Vec<Downlink> {
        lock(&self.log)
            .downlinks
            .iter()
            .filter(|d| d.dev_eui == dev_eui)
            .cloned()
            .collect()
    }

    /// Get all captured multicast batches.
    pub fn multicast_downlinks(&self) -> Vec<MulticastDownlink> {
        lock(&self.log).multicast.clone()
    }

    /// Clear captured downlinks.
    pub fn clear(&self) {
        let mut log = lock(&self.log);
        log.downlinks.clear();
        log.multicast.clear();
    }

    fn take_failure(log: &mut Log) -> Result<(), DispatchError> {
        if log.failures > 0 {
            log.failures -= 1;
            return Err(DispatchError::Rpc("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DownlinkDispatcher for RecordingDispatcher {
    async fn enqueue_downlink(
        &self,
        dev_eui: Eui64,
        confirmed: bool,
        f_port: u8,
        payload: &[u8],
    ) -> Result<u32, DispatchError> {
        let mut log = lock(&self.log);
        Self::take_failure(&mut log)?;

        let counter = log.f_cnt.entry(dev_eui).or_insert(0);
        let f_cnt = *counter;
        *counter += 1;

        tracing::debug!(dev_eui = %dev_eui, f_port, f_cnt, len = payload.len(), "Downlink captured");
        log.downlinks.push(Downlink {
            dev_eui,
            confirmed,
            f_port,
            payload: payload.to_vec(),
            f_cnt,
        });
        Ok(f_cnt)
    }

    async fn enqueue_multicast(
        &self,
        multicast_group_id: Uuid,
        f_port: u8,
        payloads: &[Vec<u8>],
    ) -> Result<Vec<u32>, DispatchError> {
        let mut log = lock(&self.log);
        Self::take_failure(&mut log)?;

        let counter = log.group_f_cnt.entry(multicast_group_id).or_insert(0);
        let start = *counter;
        *counter += payloads.len() as u32;

        tracing::debug!(
            multicast_group_id = %multicast_group_id,
            f_port,
            count = payloads.len(),
            "Multicast downlinks captured"
        );
        log.multicast.push(MulticastDownlink {
            multicast_group_id,
            f_port,
            payloads: payloads.to_vec(),
        });
        Ok((start..start + payloads.len() as u32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_and_frame_counters() {
        let d = RecordingDispatcher::new();
        let dev = Eui64([1; 8]);
        assert_eq!(d.enqueue_downlink(dev, false, 200, b"a").await.unwrap(), 0);
        assert_eq!(d.enqueue_downlink(dev, false, 200, b"b").await.unwrap(), 1);

        let writes = d.downlinks();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].payload, b"b");

        let group = Uuid::new_v4();
        let ids = d
            .enqueue_multicast(group, 201, &[vec![1], vec![2], vec![3]])
            .await
            .unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(d.multicast_downlinks()[0].payloads.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let d = RecordingDispatcher::new();
        d.fail_next(1);
        let dev = Eui64([2; 8]);
        assert!(matches!(
            d.enqueue_downlink(dev, false, 200, b"x").await,
            Err(DispatchError::Rpc(_))
        ));
        assert!(d.enqueue_downlink(dev, false, 200, b"x").await.is_ok());
        assert_eq!(d.downlinks_for(dev).len(), 1);
    }
}
