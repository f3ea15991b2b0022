use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RemoteSession, Request, run_once};
use crate::applayer::CodecError;
use crate::applayer::multicastsetup::{self, Command, McClassCSessionReq};
use crate::config::SyncConfig;
use crate::events::RemoteKind;
use crate::gps;
use crate::lorawan::Eui64;
use crate::model::{Provisioning, RemoteMulticastClassCSession};
use crate::services::Services;
use crate::store::{StoreError, StoreTx};

#[async_trait]
impl RemoteSession for RemoteMulticastClassCSession {
    const KIND: RemoteKind = RemoteKind::MulticastClassCSession;

    fn dev_eui(&self) -> Eui64 {
        self.dev_eui
    }

    fn provisioning_mut(&mut self) -> &mut Provisioning {
        &mut self.provisioning
    }

    fn request(&self) -> Result<Request, CodecError> {
        let cmd = Command::McClassCSessionReq(McClassCSessionReq {
            mc_group_id: self.mc_group_id,
            session_time: gps::gps_seconds_u32(self.session_time),
            session_time_out: self.session_time_out,
            dl_frequency: self.dl_frequency,
            dr: self.dr,
        });
        Ok(Request {
            name: cmd.name(),
            f_port: multicastsetup::DEFAULT_FPORT,
            payload: cmd.to_bytes()?,
        })
    }

    fn log_enqueued(&self, request: &Request) {
        tracing::info!(
            dev_eui = %self.dev_eui,
            mc_group_id = self.mc_group_id,
            session_time = %self.session_time,
            "{} enqueued",
            request.name
        );
    }

    async fn pending(
        tx: &mut dyn StoreTx,
        limit: usize,
        max_retry: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, StoreError> {
        tx.get_pending_remote_multicast_class_c_sessions(limit, max_retry, now)
            .await
    }

    async fn save(&self, tx: &mut dyn StoreTx) -> Result<(), StoreError> {
        tx.update_remote_multicast_class_c_session(self).await
    }
}

/// Send McClassCSessionReq for every pending Class-C session whose device
/// already accepted the multicast setup.
pub async fn sync_remote_multicast_class_c_sessions(
    services: &Services,
    config: &SyncConfig,
) -> Result<usize> {
    run_once::<RemoteMulticastClassCSession>(services, config)
        .await
        .context("sync remote multicast class-c session error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::{Aes128Key, DevAddr};
    use crate::model::{RemoteMulticastSetup, RemoteState};
    use crate::store::Store;
    use crate::testutil::{TestEnv, t0};
    use std::time::Duration;
    use uuid::Uuid;

    fn session(group: Uuid) -> RemoteMulticastClassCSession {
        RemoteMulticastClassCSession {
            dev_eui: Eui64([2; 8]),
            multicast_group_id: group,
            mc_group_id: 0,
            session_time: t0() + chrono::Duration::seconds(180),
            session_time_out: 6,
            dl_frequency: 869_525_000,
            dr: 3,
            provisioning: Provisioning::new(Duration::from_secs(60), t0()),
        }
    }

    fn setup(group: Uuid, provisioned: bool) -> RemoteMulticastSetup {
        let mut provisioning = Provisioning::new(Duration::from_secs(60), t0());
        provisioning.state_provisioned = provisioned;
        RemoteMulticastSetup {
            dev_eui: Eui64([2; 8]),
            multicast_group_id: group,
            mc_group_id: 0,
            mc_addr: DevAddr([0, 0, 0, 1]),
            mc_key_encrypted: Aes128Key::default(),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
            state: RemoteState::Setup,
            provisioning,
        }
    }

    #[test]
    fn test_request_layout() {
        let s = session(Uuid::nil());
        let req = s.request().unwrap();
        assert_eq!(req.name, "McClassCSessionReq");
        assert_eq!(req.f_port, 200);

        let gps_time = gps::gps_seconds_u32(s.session_time).to_le_bytes();
        let mut expected = vec![0x04, 0x00];
        expected.extend_from_slice(&gps_time);
        // timeout, then 869525000 / 100 = 0x84ADD2 little endian, then DR
        expected.extend_from_slice(&[0x06, 0xD2, 0xAD, 0x84, 0x03]);
        assert_eq!(req.payload, expected);
    }

    #[tokio::test]
    async fn test_waits_for_multicast_setup() {
        let env = TestEnv::new();
        let group = Uuid::new_v4();

        let mut tx = env.store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(group, false))
            .await
            .unwrap();
        tx.create_remote_multicast_class_c_session(&session(group))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let config = SyncConfig::default();
        assert_eq!(
            sync_remote_multicast_class_c_sessions(&env.services, &config)
                .await
                .unwrap(),
            0
        );

        let mut tx = env.store.begin().await.unwrap();
        tx.update_remote_multicast_setup(&setup(group, true))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            sync_remote_multicast_class_c_sessions(&env.services, &config)
                .await
                .unwrap(),
            1
        );
        let sent = env.dispatcher.downlinks();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload[0], 0x04);
        assert!(!sent[0].confirmed);
    }

    #[tokio::test]
    async fn test_unencodable_session_does_not_block_others() {
        let env = TestEnv::new();
        let group = Uuid::new_v4();
        let good = session(group);
        let mut bad = session(group);
        bad.dev_eui = Eui64([3; 8]);
        bad.session_time_out = 16;
        let mut bad_setup = setup(group, true);
        bad_setup.dev_eui = bad.dev_eui;

        let mut tx = env.store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(group, true))
            .await
            .unwrap();
        tx.create_remote_multicast_setup(&bad_setup).await.unwrap();
        tx.create_remote_multicast_class_c_session(&good)
            .await
            .unwrap();
        tx.create_remote_multicast_class_c_session(&bad)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let config = SyncConfig {
            sync_retries: 3,
            ..SyncConfig::default()
        };
        for _ in 0..5 {
            sync_remote_multicast_class_c_sessions(&env.services, &config)
                .await
                .unwrap();
            env.clock.advance(Duration::from_secs(60));
        }

        assert_eq!(env.dispatcher.downlinks_for(good.dev_eui).len(), 3);
        assert!(env.dispatcher.downlinks_for(bad.dev_eui).is_empty());

        let mut tx = env.store.begin().await.unwrap();
        let row = tx
            .get_remote_multicast_class_c_session(good.dev_eui, group)
            .await
            .unwrap();
        assert_eq!(row.provisioning.retry_count, 3);
        let row = tx
            .get_remote_multicast_class_c_session(bad.dev_eui, group)
            .await
            .unwrap();
        assert_eq!(row.provisioning.retry_count, 3);
        assert!(!row.provisioning.state_provisioned);
    }
}
