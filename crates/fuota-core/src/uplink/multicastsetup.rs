use super::{UplinkError, complete};
use crate::applayer::multicastsetup::{
    Command, McClassCSessionAns, McGroupDeleteAns, McGroupSetupAns,
};
use crate::dispatch::MulticastError;
use crate::lorawan::Eui64;
use crate::services::Services;
use crate::store::StoreTx;

/// Handle an uplink received on the remote multicast setup FPort.
pub async fn handle_remote_multicast_setup_command(
    services: &Services,
    dev_eui: Eui64,
    data: &[u8],
) -> Result<(), UplinkError> {
    let cmd = Command::from_bytes(true, data)?;

    let mut tx = services.store.begin().await?;
    let result = match cmd {
        Command::McGroupSetupAns(pl) => handle_mc_group_setup_ans(tx.as_mut(), dev_eui, &pl).await,
        Command::McGroupDeleteAns(pl) => {
            handle_mc_group_delete_ans(tx.as_mut(), services, dev_eui, &pl).await
        }
        Command::McClassCSessionAns(pl) => {
            handle_mc_class_c_session_ans(tx.as_mut(), services, dev_eui, &pl).await
        }
        other => Err(UplinkError::CidNotImplemented(other.name().to_string())),
    };
    complete(tx, result).await
}

async fn handle_mc_group_setup_ans(
    tx: &mut dyn StoreTx,
    dev_eui: Eui64,
    pl: &McGroupSetupAns,
) -> Result<(), UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        id_error = pl.id_error,
        mc_group_id = pl.mc_group_id,
        "McGroupSetupAns received"
    );

    if pl.id_error {
        return Err(UplinkError::IdError(pl.mc_group_id));
    }

    let mut rms = tx
        .get_remote_multicast_setup_by_group_id(dev_eui, pl.mc_group_id)
        .await?;
    rms.provisioning.state_provisioned = true;
    tx.update_remote_multicast_setup(&rms).await?;
    Ok(())
}

async fn handle_mc_group_delete_ans(
    tx: &mut dyn StoreTx,
    services: &Services,
    dev_eui: Eui64,
    pl: &McGroupDeleteAns,
) -> Result<(), UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        mc_group_id = pl.mc_group_id,
        mc_group_undefined = pl.mc_group_undefined,
        "McGroupDeleteAns received"
    );

    if pl.mc_group_undefined {
        return Err(UplinkError::McGroupUndefined(pl.mc_group_id));
    }

    let mut rms = tx
        .get_remote_multicast_setup_by_group_id(dev_eui, pl.mc_group_id)
        .await?;
    rms.provisioning.state_provisioned = true;
    tx.update_remote_multicast_setup(&rms).await?;

    match services
        .multicast
        .remove_device_from_multicast_group(rms.multicast_group_id, dev_eui)
        .await
    {
        Err(MulticastError::DoesNotExist) => {
            tracing::info!(
                dev_eui = %dev_eui,
                multicast_group_id = %rms.multicast_group_id,
                "Removing device from multicast group, but device does not exist"
            );
            Ok(())
        }
        other => other.map_err(UplinkError::from),
    }
}

async fn handle_mc_class_c_session_ans(
    tx: &mut dyn StoreTx,
    services: &Services,
    dev_eui: Eui64,
    pl: &McClassCSessionAns,
) -> Result<(), UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        time_to_start = ?pl.time_to_start,
        mc_group_undefined = pl.mc_group_undefined,
        freq_error = pl.freq_error,
        dr_error = pl.dr_error,
        mc_group_id = pl.mc_group_id,
        "McClassCSessionAns received"
    );

    if pl.has_error() {
        return Err(UplinkError::ClassCSession {
            mc_group_id: pl.mc_group_id,
            dr_error: pl.dr_error,
            freq_error: pl.freq_error,
            mc_group_undefined: pl.mc_group_undefined,
        });
    }

    let mut sess = tx
        .get_remote_multicast_class_c_session_by_group_id(dev_eui, pl.mc_group_id)
        .await?;
    sess.provisioning.state_provisioned = true;
    tx.update_remote_multicast_class_c_session(&sess).await?;

    match services
        .multicast
        .add_device_to_multicast_group(sess.multicast_group_id, dev_eui)
        .await
    {
        Err(MulticastError::AlreadyExists) => {
            tracing::warn!(
                dev_eui = %dev_eui,
                multicast_group_id = %sess.multicast_group_id,
                "Adding device to multicast group, but device was already added"
            );
            Ok(())
        }
        other => other.map_err(UplinkError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::{Aes128Key, DevAddr};
    use crate::model::{
        GroupType, MulticastGroup, Provisioning, RemoteMulticastClassCSession,
        RemoteMulticastSetup, RemoteState,
    };
    use crate::store::{Store, StoreError};
    use crate::testutil::{TestEnv, t0};
    use std::time::Duration;
    use uuid::Uuid;

    const DEV: Eui64 = Eui64([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

    fn group() -> MulticastGroup {
        MulticastGroup {
            id: Uuid::nil(),
            name: "fuota-test".into(),
            mc_addr: DevAddr([1, 2, 3, 4]),
            mc_nwk_s_key: Aes128Key::default(),
            mc_app_s_key: Aes128Key::default(),
            mc_key: Aes128Key::default(),
            f_cnt: 0,
            group_type: GroupType::C,
            dr: 5,
            frequency: 869_525_000,
            ping_slot_period: 0,
            service_profile_id: Uuid::nil(),
            routing_profile_id: Uuid::nil(),
        }
    }

    fn setup(group: Uuid, mc_group_id: u8) -> RemoteMulticastSetup {
        RemoteMulticastSetup {
            dev_eui: DEV,
            multicast_group_id: group,
            mc_group_id,
            mc_addr: DevAddr([1, 2, 3, 4]),
            mc_key_encrypted: Aes128Key::default(),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
            state: RemoteState::Setup,
            provisioning: Provisioning::new(Duration::from_secs(60), t0()),
        }
    }

    async fn seed(env: &TestEnv, mc_group_id: u8) -> Uuid {
        let id = env
            .services
            .multicast
            .create_multicast_group(&group())
            .await
            .unwrap();
        let mut tx = env.store.begin().await.unwrap();
        tx.create_remote_multicast_setup(&setup(id, mc_group_id))
            .await
            .unwrap();
        tx.create_remote_multicast_class_c_session(&RemoteMulticastClassCSession {
            dev_eui: DEV,
            multicast_group_id: id,
            mc_group_id,
            session_time: t0(),
            session_time_out: 4,
            dl_frequency: 869_525_000,
            dr: 5,
            provisioning: Provisioning::new(Duration::from_secs(60), t0()),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        id
    }

    async fn provisioned(env: &TestEnv, id: Uuid) -> (bool, bool) {
        let mut tx = env.store.begin().await.unwrap();
        let rms = tx.get_remote_multicast_setup(DEV, id).await.unwrap();
        let sess = tx
            .get_remote_multicast_class_c_session(DEV, id)
            .await
            .unwrap();
        (
            rms.provisioning.state_provisioned,
            sess.provisioning.state_provisioned,
        )
    }

    #[tokio::test]
    async fn test_mc_group_setup_ans() {
        let env = TestEnv::new();
        let id = seed(&env, 1).await;

        handle_remote_multicast_setup_command(&env.services, DEV, &[0x02, 0x01])
            .await
            .unwrap();
        assert_eq!(provisioned(&env, id).await, (true, false));
    }

    #[tokio::test]
    async fn test_mc_group_setup_ans_id_error() {
        let env = TestEnv::new();
        let id = seed(&env, 2).await;

        let err = handle_remote_multicast_setup_command(&env.services, DEV, &[0x02, 0x06])
            .await
            .unwrap_err();
        assert!(matches!(err, UplinkError::IdError(2)));
        assert_eq!(err.to_string(), "IDError for McGroupID: 2");
        assert_eq!(provisioned(&env, id).await, (false, false));
    }

    #[tokio::test]
    async fn test_mc_group_setup_ans_unknown_row() {
        let env = TestEnv::new();
        seed(&env, 1).await;

        let err = handle_remote_multicast_setup_command(&env.services, DEV, &[0x02, 0x03])
            .await
            .unwrap_err();
        assert!(matches!(err, UplinkError::Store(StoreError::DoesNotExist)));
    }

    #[tokio::test]
    async fn test_mc_class_c_session_ans_adds_member() {
        let env = TestEnv::new();
        let id = seed(&env, 0).await;

        // status 0x00, TimeToStart 10s
        let frame = [0x04, 0x00, 0x0A, 0x00, 0x00];
        handle_remote_multicast_setup_command(&env.services, DEV, &frame)
            .await
            .unwrap();
        assert_eq!(provisioned(&env, id).await, (false, true));
        assert_eq!(env.multicast.members(id), vec![DEV]);

        // A repeated answer finds the device already in the group.
        handle_remote_multicast_setup_command(&env.services, DEV, &frame)
            .await
            .unwrap();
        assert_eq!(env.multicast.members(id), vec![DEV]);
    }

    #[tokio::test]
    async fn test_mc_class_c_session_ans_error_bits() {
        let env = TestEnv::new();
        let id = seed(&env, 0).await;

        let err = handle_remote_multicast_setup_command(&env.services, DEV, &[0x04, 0x0C])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "DRError: true, FreqError: true, McGroupUndefined: false for McGroupID: 0"
        );
        assert_eq!(provisioned(&env, id).await, (false, false));
        assert!(env.multicast.members(id).is_empty());
    }

    #[tokio::test]
    async fn test_mc_group_delete_ans_tolerates_missing_member() {
        let env = TestEnv::new();
        let id = seed(&env, 1).await;

        handle_remote_multicast_setup_command(&env.services, DEV, &[0x03, 0x01])
            .await
            .unwrap();
        assert_eq!(provisioned(&env, id).await, (true, false));

        let err = handle_remote_multicast_setup_command(&env.services, DEV, &[0x03, 0x05])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "McGroupUndefined for McGroupID: 1");
    }

    #[tokio::test]
    async fn test_unknown_cid() {
        let env = TestEnv::new();
        let err = handle_remote_multicast_setup_command(&env.services, DEV, &[0x01])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "CID not implemented: 0x01");
    }
}
