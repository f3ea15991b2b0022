//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::ManualClock;
use crate::dispatch::{MemoryMulticastGroups, RecordingDispatcher};
use crate::events::CollectingObserver;
use crate::services::Services;
use crate::store::MemoryStore;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// In-memory collaborators wired into one [`Services`], with handles kept
/// for assertions.
pub struct TestEnv {
    pub store: MemoryStore,
    pub dispatcher: RecordingDispatcher,
    pub multicast: MemoryMulticastGroups,
    pub clock: ManualClock,
    pub observer: Arc<CollectingObserver>,
    pub services: Services,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let dispatcher = RecordingDispatcher::new();
        let multicast = MemoryMulticastGroups::new();
        let clock = ManualClock::new(t0());
        let observer = Arc::new(CollectingObserver::new());
        let services = Services::new(
            Arc::new(store.clone()),
            Arc::new(dispatcher.clone()),
            Arc::new(multicast.clone()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_observer(observer.clone());
        Self {
            store,
            dispatcher,
            multicast,
            clock,
            observer,
            services,
        }
    }
}
