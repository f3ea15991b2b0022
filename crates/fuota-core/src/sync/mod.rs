//! Remote session sync loops.
//!
//! The multicast setup, Class-C session and fragmentation session loops
//! share one algorithm, implemented once in [`sync_pending`]:
//!
//! 1. select pending rows (unprovisioned, `retry_count < max`,
//!    `retry_after <= now`), skipping rows locked elsewhere
//! 2. build the request from the persisted fields and enqueue it unicast
//! 3. increment `retry_count` and push `retry_after` by `retry_interval`
//!
//! A row that runs out of retries, or whose request cannot be encoded,
//! stops being selected; the deployment loop turns that into a device
//! error later on.

mod class_c_session;
mod fragmentation_session;
mod multicast_setup;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::applayer::CodecError;
use crate::config::SyncConfig;
use crate::events::{FuotaEvent, RemoteKind};
use crate::lorawan::Eui64;
use crate::model::Provisioning;
use crate::services::Services;
use crate::store::{StoreError, StoreTx, finish};

pub use class_c_session::sync_remote_multicast_class_c_sessions;
pub use fragmentation_session::sync_remote_fragmentation_sessions;
pub use multicast_setup::sync_remote_multicast_setups;

/// A request the sync loop sends to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub name: &'static str,
    pub f_port: u8,
    pub payload: Vec<u8>,
}

/// A remote record kept in sync with a device by retrying a request until
/// the device acknowledges it.
#[async_trait]
pub trait RemoteSession: Sized + Send + Sync {
    const KIND: RemoteKind;

    fn dev_eui(&self) -> Eui64;

    fn provisioning_mut(&mut self) -> &mut Provisioning;

    /// The request matching the record's current state.
    fn request(&self) -> Result<Request, CodecError>;

    fn log_enqueued(&self, request: &Request);

    async fn pending(
        tx: &mut dyn StoreTx,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, StoreError>;

    async fn save(&self, tx: &mut dyn StoreTx) -> Result<(), StoreError>;
}

/// Send one request per pending row inside `tx`. Returns the events to
/// publish once the transaction commits, one per request sent.
///
/// A row whose request cannot be encoded is marked exhausted and skipped so
/// it neither blocks nor re-sends the rest of the batch.
pub async fn sync_pending<R: RemoteSession>(
    tx: &mut dyn StoreTx,
    services: &Services,
    config: &SyncConfig,
) -> Result<Vec<FuotaEvent>> {
    let now = services.clock.now();
    let items = R::pending(tx, config.sync_batch_size, config.sync_retries, now)
        .await
        .with_context(|| format!("get pending {} error", R::KIND))?;

    let mut events = Vec::with_capacity(items.len());
    for mut item in items {
        let request = match item.request() {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    dev_eui = %item.dev_eui(),
                    kind = %R::KIND,
                    error = %e,
                    "Marshal binary error, giving up on request"
                );
                item.provisioning_mut().retry_count = config.sync_retries;
                item.save(tx)
                    .await
                    .with_context(|| format!("update {} error", R::KIND))?;
                continue;
            }
        };

        services
            .dispatcher
            .enqueue_downlink(item.dev_eui(), false, request.f_port, &request.payload)
            .await
            .context("enqueue downlink payload error")?;
        item.log_enqueued(&request);

        let provisioning = item.provisioning_mut();
        provisioning.record_attempt(now);
        let retry_count = provisioning.retry_count;

        item.save(tx)
            .await
            .with_context(|| format!("update {} error", R::KIND))?;

        events.push(FuotaEvent::RemoteRequestSent {
            kind: R::KIND,
            dev_eui: item.dev_eui(),
            command: request.name,
            retry_count,
        });
    }

    Ok(events)
}

/// One sync pass in its own transaction. Returns the number of requests
/// sent.
pub async fn run_once<R: RemoteSession>(services: &Services, config: &SyncConfig) -> Result<usize> {
    let mut tx = services
        .store
        .begin()
        .await
        .context("begin transaction error")?;
    let result = sync_pending::<R>(tx.as_mut(), services, config).await;
    let events = finish(tx, result).await?;

    for event in &events {
        services.observer.on_event(event);
    }
    Ok(events.len())
}
