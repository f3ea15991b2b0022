use super::UplinkError;
use crate::applayer::clocksync::{self, AppTimeAns, AppTimeReq, Command};
use crate::gps;
use crate::lorawan::Eui64;
use crate::services::Services;

/// Handle an uplink received on the clock sync FPort. Stateless: every
/// AppTimeReq is answered with the correction to apply.
pub async fn handle_clock_sync_command(
    services: &Services,
    dev_eui: Eui64,
    data: &[u8],
) -> Result<(), UplinkError> {
    match Command::from_bytes(true, data)? {
        Command::AppTimeReq(pl) => handle_app_time_req(services, dev_eui, &pl).await,
        other => Err(UplinkError::CidNotImplemented(other.name().to_string())),
    }
}

/// Seconds the device clock is behind the network clock, both in GPS time
/// modulo 2^32.
pub fn time_correction(network_time: u32, device_time: u32) -> i32 {
    network_time.wrapping_sub(device_time) as i32
}

async fn handle_app_time_req(
    services: &Services,
    dev_eui: Eui64,
    pl: &AppTimeReq,
) -> Result<(), UplinkError> {
    tracing::info!(
        dev_eui = %dev_eui,
        device_time = pl.device_time,
        token_req = pl.token_req,
        ans_required = pl.ans_required,
        "AppTimeReq received"
    );

    let network_time = gps::gps_seconds_u32(services.clock.now());
    let cmd = Command::AppTimeAns(AppTimeAns {
        time_correction: time_correction(network_time, pl.device_time),
        token_ans: pl.token_req,
    });
    let payload = cmd.to_bytes()?;

    services
        .dispatcher
        .enqueue_downlink(dev_eui, false, clocksync::DEFAULT_FPORT, &payload)
        .await?;

    tracing::info!(dev_eui = %dev_eui, "{} enqueued", cmd.name());
    Ok(())
}
