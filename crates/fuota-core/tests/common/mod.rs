//! Simulated network and devices for end-to-end deployment tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fuota_core::applayer::{fragmentation, multicastsetup};
use fuota_core::dispatch::Downlink;
use fuota_core::sync::{
    sync_remote_fragmentation_sessions, sync_remote_multicast_class_c_sessions,
    sync_remote_multicast_setups,
};
use fuota_core::{
    CollectingObserver, Config, DeploymentState, DeviceKeys, Eui64, FuotaDeployment,
    FuotaDeploymentDevice, ManualClock, MemoryMulticastGroups, MemoryStore, RecordingDispatcher,
    Services, Store, UplinkError, handle_uplink, process_batch,
};
use uuid::Uuid;

pub const DEV_A: Eui64 = Eui64([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
pub const DEV_B: Eui64 = Eui64([0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// How a simulated device reacts to the downlinks it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Acknowledge every request and report all fragments received.
    Cooperative,
    /// Never answer.
    Silent,
    /// Reject the multicast setup with an IDError.
    RejectMulticastSetup,
}

pub struct SimDevice {
    pub dev_eui: Eui64,
    pub behaviour: Behaviour,
    seen: usize,
    nb_frag: u16,
}

impl SimDevice {
    pub fn new(dev_eui: Eui64, behaviour: Behaviour) -> Self {
        Self {
            dev_eui,
            behaviour,
            seen: 0,
            nb_frag: 0,
        }
    }

    /// Answers to the downlinks received since the last call.
    fn answers(&mut self, downlinks: &[Downlink]) -> Vec<(u8, Vec<u8>)> {
        let new = &downlinks[self.seen.min(downlinks.len())..];
        self.seen = downlinks.len();
        if self.behaviour == Behaviour::Silent {
            return Vec::new();
        }
        new.iter().filter_map(|d| self.answer(d)).collect()
    }

    fn answer(&mut self, d: &Downlink) -> Option<(u8, Vec<u8>)> {
        match d.f_port {
            multicastsetup::DEFAULT_FPORT => {
                let ans = match multicastsetup::Command::from_bytes(false, &d.payload).ok()? {
                    multicastsetup::Command::McGroupSetupReq(req) => {
                        multicastsetup::Command::McGroupSetupAns(multicastsetup::McGroupSetupAns {
                            mc_group_id: req.mc_group_id,
                            id_error: self.behaviour == Behaviour::RejectMulticastSetup,
                        })
                    }
                    multicastsetup::Command::McGroupDeleteReq(req) => {
                        multicastsetup::Command::McGroupDeleteAns(
                            multicastsetup::McGroupDeleteAns {
                                mc_group_id: req.mc_group_id,
                                mc_group_undefined: false,
                            },
                        )
                    }
                    multicastsetup::Command::McClassCSessionReq(req) => {
                        multicastsetup::Command::McClassCSessionAns(
                            multicastsetup::McClassCSessionAns {
                                mc_group_id: req.mc_group_id,
                                dr_error: false,
                                freq_error: false,
                                mc_group_undefined: false,
                                time_to_start: Some(0),
                            },
                        )
                    }
                    _ => return None,
                };
                Some((d.f_port, ans.to_bytes().ok()?))
            }
            fragmentation::DEFAULT_FPORT => {
                let ans = match fragmentation::Command::from_bytes(false, &d.payload).ok()? {
                    fragmentation::Command::FragSessionSetupReq(req) => {
                        self.nb_frag = req.nb_frag;
                        fragmentation::Command::FragSessionSetupAns(
                            fragmentation::FragSessionSetupAns {
                                frag_index: req.frag_index,
                                encoding_unsupported: false,
                                not_enough_memory: false,
                                frag_session_index_not_supported: false,
                                wrong_descriptor: false,
                            },
                        )
                    }
                    fragmentation::Command::FragSessionStatusReq(req) => {
                        fragmentation::Command::FragSessionStatusAns(
                            fragmentation::FragSessionStatusAns {
                                frag_index: req.frag_index,
                                nb_frag_received: self.nb_frag,
                                missing_frag: 0,
                                not_enough_matrix_memory: false,
                            },
                        )
                    }
                    _ => return None,
                };
                Some((d.f_port, ans.to_bytes().ok()?))
            }
            _ => None,
        }
    }
}

/// In-memory network server, store and fleet on a manual clock.
pub struct Harness {
    pub store: MemoryStore,
    pub dispatcher: RecordingDispatcher,
    pub multicast: MemoryMulticastGroups,
    pub clock: ManualClock,
    pub observer: Arc<CollectingObserver>,
    pub services: Services,
    pub config: Config,
    pub devices: Vec<SimDevice>,
    /// Errors returned by the uplink handlers, in order.
    pub uplink_errors: Vec<UplinkError>,
}

impl Harness {
    pub fn new(devices: Vec<SimDevice>) -> Self {
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

        let mut config = Config::default();
        config.remote_multicast_setup.sync_retries = 3;
        config.fragmentation_session.sync_retries = 3;

        Self {
            store,
            dispatcher,
            multicast,
            clock,
            observer,
            services,
            config,
            devices,
            uplink_errors: Vec::new(),
        }
    }

    /// Register the fleet and a deployment of `payload` to all of it.
    pub async fn deploy(&self, payload: Vec<u8>) -> FuotaDeployment {
        self.deploy_with(payload, |_| {}).await
    }

    pub async fn deploy_with<F>(&self, payload: Vec<u8>, adjust: F) -> FuotaDeployment
    where
        F: FnOnce(&mut FuotaDeployment),
    {
        let mut d = FuotaDeployment::new("firmware v2", payload, t0());
        d.frag_size = 10;
        d.unicast_timeout = Duration::from_secs(10);
        adjust(&mut d);

        let mut tx = self.store.begin().await.unwrap();
        for (i, dev) in self.devices.iter().enumerate() {
            tx.create_device_keys(&DeviceKeys {
                dev_eui: dev.dev_eui,
                app_key: [i as u8 + 1; 16].into(),
                gen_app_key: Default::default(),
                service_profile_id: Uuid::from_u128(42),
            })
            .await
            .unwrap();
        }
        let dev_euis: Vec<Eui64> = self.devices.iter().map(|d| d.dev_eui).collect();
        tx.create_fuota_deployment(&d, &dev_euis).await.unwrap();
        tx.commit().await.unwrap();
        d
    }

    /// One pass of every loop, the fleet answering, then one second passes.
    pub async fn tick(&mut self) {
        self.try_tick().await.unwrap();
    }

    pub async fn try_tick(&mut self) -> anyhow::Result<()> {
        sync_remote_multicast_setups(&self.services, &self.config.remote_multicast_setup).await?;
        sync_remote_multicast_class_c_sessions(&self.services, &self.config.remote_multicast_setup)
            .await?;
        sync_remote_fragmentation_sessions(&self.services, &self.config.fragmentation_session)
            .await?;
        process_batch(&self.services, &self.config.fuota_deployment).await?;
        self.deliver_answers().await;
        self.clock.advance(Duration::from_secs(1));
        Ok(())
    }

    pub async fn deliver_answers(&mut self) {
        let mut uplinks = Vec::new();
        for dev in &mut self.devices {
            let downlinks = self.dispatcher.downlinks_for(dev.dev_eui);
            for (f_port, data) in dev.answers(&downlinks) {
                uplinks.push((dev.dev_eui, f_port, data));
            }
        }
        for (dev_eui, f_port, data) in uplinks {
            if let Err(e) = handle_uplink(&self.services, dev_eui, f_port, &data).await {
                self.uplink_errors.push(e);
            }
        }
    }

    /// Tick until the deployment is DONE. Panics after `max_ticks`.
    pub async fn run_to_completion(&mut self, id: Uuid, max_ticks: usize) {
        for _ in 0..max_ticks {
            if self.deployment(id).await.state == DeploymentState::Done {
                return;
            }
            self.tick().await;
        }
        panic!("deployment did not complete within {max_ticks} ticks");
    }

    pub async fn deployment(&self, id: Uuid) -> FuotaDeployment {
        let mut tx = self.store.begin().await.unwrap();
        tx.get_fuota_deployment(id).await.unwrap()
    }

    pub async fn device(&self, id: Uuid, dev_eui: Eui64) -> FuotaDeploymentDevice {
        let mut tx = self.store.begin().await.unwrap();
        tx.get_fuota_deployment_device(id, dev_eui).await.unwrap()
    }
}
