//! Multicast group handlers (MC_CREATE, MC_SETUP, MC_SESS_C_SETUP).

use anyhow::{Context, Result};
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

use super::{StepContext, multicast_group_id, retry_window};
use crate::crypto;
use crate::lorawan::{Aes128Key, DevAddr};
use crate::model::{
    FuotaDeployment, MulticastGroup, Provisioning, RemoteMulticastClassCSession,
    RemoteMulticastSetup, RemoteState,
};
use crate::store::StoreError;

/// Fresh random multicast address and group key.
fn random_group_keys() -> (DevAddr, Aes128Key) {
    let mut rng = rand::thread_rng();
    let mut mc_addr = DevAddr::default();
    rng.fill_bytes(&mut mc_addr.0);
    let mut mc_key = Aes128Key::default();
    rng.fill_bytes(&mut mc_key.0);
    (mc_addr, mc_key)
}

/// MC_CREATE - create the multicast group on the network server.
pub async fn step_multicast_create(
    ctx: &mut StepContext<'_>,
    item: &mut FuotaDeployment,
) -> Result<()> {
    item.validate().context("validate fuota deployment error")?;

    let (mc_addr, mc_key) = random_group_keys();
    let mc_app_s_key = crypto::mc_app_s_key(&mc_key, mc_addr);
    let mc_net_s_key = crypto::mc_net_s_key(&mc_key, mc_addr);

    let service_profile_id = ctx
        .tx
        .get_service_profile_id_for_fuota_deployment(item.id)
        .await
        .context("get service-profile for fuota deployment error")?;

    let group = MulticastGroup {
        id: Uuid::nil(),
        name: format!("fuota-{}", item.id),
        mc_addr,
        mc_nwk_s_key: mc_net_s_key,
        mc_app_s_key,
        mc_key,
        f_cnt: 0,
        group_type: item.group_type,
        dr: item.dr,
        frequency: item.frequency,
        ping_slot_period: item.ping_slot_period,
        service_profile_id,
        routing_profile_id: ctx.config.application_server_id,
    };

    let id = ctx
        .services
        .multicast
        .create_multicast_group(&group)
        .await
        .context("create multicast-group error")?;

    info!(
        deployment_id = %item.id,
        multicast_group_id = %id,
        mc_addr = %mc_addr,
        group_type = %item.group_type,
        "Multicast group created"
    );

    item.multicast_group_id = Some(id);
    item.next_step_after = ctx.now;
    Ok(())
}

/// MC_SETUP - wrap the group key for every device and queue a remote
/// multicast setup.
pub async fn step_multicast_setup(
    ctx: &mut StepContext<'_>,
    item: &mut FuotaDeployment,
) -> Result<()> {
    let group_id = multicast_group_id(item)?;

    let group = ctx
        .services
        .multicast
        .get_multicast_group(group_id)
        .await
        .context("get multicast group error")?;

    let device_keys = ctx
        .tx
        .get_device_keys_for_fuota_deployment(item.id)
        .await
        .context("get device keys for fuota deployment error")?;

    for dk in &device_keys {
        let mc_root_key = crypto::mc_root_key(&dk.app_key, &dk.gen_app_key);
        let mc_ke_key = crypto::mc_ke_key(&mc_root_key);

        let rms = RemoteMulticastSetup {
            dev_eui: dk.dev_eui,
            multicast_group_id: group_id,
            mc_group_id: ctx.config.mc_group_id,
            mc_addr: group.mc_addr,
            mc_key_encrypted: crypto::encrypt_mc_key(&mc_ke_key, &group.mc_key),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
            state: RemoteState::Setup,
            provisioning: Provisioning::new(item.unicast_timeout, ctx.now),
        };

        // A previous attempt of this step may have created it already.
        match ctx
            .tx
            .delete_remote_multicast_setup(dk.dev_eui, group_id)
            .await
        {
            Ok(()) | Err(StoreError::DoesNotExist) => {}
            Err(e) => return Err(e).context("delete remote multicast setup error"),
        }
        ctx.tx
            .create_remote_multicast_setup(&rms)
            .await
            .context("create remote multicast setup error")?;
    }

    info!(
        deployment_id = %item.id,
        devices = device_keys.len(),
        "Remote multicast setups created"
    );

    item.next_step_after = ctx.after(retry_window(
        ctx.config.remote_multicast_setup_retries,
        item.unicast_timeout,
    ))?;
    Ok(())
}

/// MC_SESS_C_SETUP - schedule the Class-C session on every device that
/// accepted the fragmentation session.
pub async fn step_multicast_sess_c_setup(
    ctx: &mut StepContext<'_>,
    item: &mut FuotaDeployment,
) -> Result<()> {
    let group_id = multicast_group_id(item)?;

    let group = ctx
        .services
        .multicast
        .get_multicast_group(group_id)
        .await
        .context("get multicast group error")?;

    let dev_euis = ctx
        .tx
        .get_dev_euis_with_fragmentation_session_setup(group_id, ctx.config.frag_index)
        .await
        .context("get devices with fragmentation session setup error")?;

    let session_time = ctx.after(retry_window(
        ctx.config.remote_multicast_setup_retries,
        item.unicast_timeout,
    ))?;

    for dev_eui in &dev_euis {
        let sess = RemoteMulticastClassCSession {
            dev_eui: *dev_eui,
            multicast_group_id: group_id,
            mc_group_id: ctx.config.mc_group_id,
            session_time,
            session_time_out: item.multicast_timeout,
            dl_frequency: group.frequency,
            dr: group.dr,
            provisioning: Provisioning::new(item.unicast_timeout, ctx.now),
        };

        match ctx
            .tx
            .delete_remote_multicast_class_c_session(*dev_eui, group_id)
            .await
        {
            Ok(()) | Err(StoreError::DoesNotExist) => {}
            Err(e) => return Err(e).context("delete remote multicast class-c session error"),
        }
        ctx.tx
            .create_remote_multicast_class_c_session(&sess)
            .await
            .context("create remote multicast class-c session error")?;
    }

    info!(
        deployment_id = %item.id,
        devices = dev_euis.len(),
        session_time = %session_time,
        "Remote multicast class-c sessions created"
    );

    item.next_step_after = session_time;
    Ok(())
}
