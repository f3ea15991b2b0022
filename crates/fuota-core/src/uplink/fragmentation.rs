use super::{UplinkError, complete};
use crate::applayer::fragmentation::{
    Command, FragSessionDeleteAns, FragSessionSetupAns, FragSessionStatusAns,
};
use crate::events::FuotaEvent;
use crate::lorawan::Eui64;
use crate::model::{DeviceState, FuotaDeploymentDevice};
use crate::services::Services;
use crate::store::StoreTx;

/// Handle an uplink received on the fragmentation FPort.
pub async fn handle_fragmentation_command(
    services: &Services,
    dev_eui: Eui64,
    data: &[u8],
) -> Result<(), UplinkError> {
    let cmd = Command::from_bytes(true, data)?;

    let mut tx = services.store.begin().await?;
    let result = match cmd {
        Command::FragSessionSetupAns(pl) => handle_frag_session_setup_ans(tx.as_mut(), dev_eui, &pl)
            .await
            .map(|_| None),
        Command::FragSessionDeleteAns(pl) => {
            handle_frag_session_delete_ans(tx.as_mut(), dev_eui, &pl)
                .await
                .map(|_| None)
        }
        Command::FragSessionStatusAns(pl) => {
            handle_frag_session_status_ans(tx.as_mut(), dev_eui, &pl)
                .await
                .map(Some)
        }
        other => Err(UplinkError::CidNotImplemented(other.name().to_string())),
    };

    if let Some(fdd) = complete(tx, result).await? {
        services.observer.on_event(&FuotaEvent::DeviceStatus {
            deployment_id: fdd.fuota_deployment_id,
            dev_eui,
            state: fdd.state,
            error_message: fdd.error_message,
        });
    }
    Ok(())
}

async fn handle_frag_session_setup_ans(
    tx: &mut dyn StoreTx,
    dev_eui: Eui64,
    pl: &FragSessionSetupAns,
) -> Result<(), UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        frag_index = pl.frag_index,
        wrong_descriptor = pl.wrong_descriptor,
        frag_session_index_not_supported = pl.frag_session_index_not_supported,
        not_enough_memory = pl.not_enough_memory,
        encoding_unsupported = pl.encoding_unsupported,
        "FragSessionSetupAns received"
    );

    if pl.has_error() {
        return Err(UplinkError::FragSessionSetup {
            wrong_descriptor: pl.wrong_descriptor,
            frag_session_index_not_supported: pl.frag_session_index_not_supported,
            not_enough_memory: pl.not_enough_memory,
            encoding_unsupported: pl.encoding_unsupported,
        });
    }

    let mut rfs = tx
        .get_remote_fragmentation_session(dev_eui, pl.frag_index)
        .await?;
    rfs.provisioning.state_provisioned = true;
    tx.update_remote_fragmentation_session(&rfs).await?;
    Ok(())
}

async fn handle_frag_session_delete_ans(
    tx: &mut dyn StoreTx,
    dev_eui: Eui64,
    pl: &FragSessionDeleteAns,
) -> Result<(), UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        frag_index = pl.frag_index,
        session_does_not_exist = pl.session_does_not_exist,
        "FragSessionDeleteAns received"
    );

    if pl.session_does_not_exist {
        return Err(UplinkError::FragSessionDoesNotExist(pl.frag_index));
    }

    let mut rfs = tx
        .get_remote_fragmentation_session(dev_eui, pl.frag_index)
        .await?;
    rfs.provisioning.state_provisioned = true;
    tx.update_remote_fragmentation_session(&rfs).await?;
    Ok(())
}

/// The status answer is the device's confirmation that it finished the
/// deployment; it settles the PENDING device row either way.
async fn handle_frag_session_status_ans(
    tx: &mut dyn StoreTx,
    dev_eui: Eui64,
    pl: &FragSessionStatusAns,
) -> Result<FuotaDeploymentDevice, UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        frag_index = pl.frag_index,
        missing_frag = pl.missing_frag,
        nb_frag_received = pl.nb_frag_received,
        not_enough_matrix_memory = pl.not_enough_matrix_memory,
        "FragSessionStatusAns received"
    );

    let mut fdd = tx.get_pending_fuota_deployment_device(dev_eui).await?;
    fdd.state = DeviceState::Success;

    if pl.missing_frag > 0 {
        fdd.state = DeviceState::Error;
        fdd.error_message = format!(
            "{} fragments missed ({} received).",
            pl.missing_frag, pl.nb_frag_received
        );
    }

    if pl.not_enough_matrix_memory {
        fdd.state = DeviceState::Error;
        fdd.error_message = "Not enough matrix memory.".to_string();
    }

    tx.update_fuota_deployment_device(&fdd).await?;
    Ok(fdd)
}
