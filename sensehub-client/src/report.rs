use std::time::Duration;

use log::debug;
use sensehub_proto::SensorReport;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::{ReconnectTimer, http, sensor::SensorQuerent};

/// Read the sensor and push it to the station every `interval`, until
/// shutdown or the first delivery failure.
pub async fn run(
    querent: &mut SensorQuerent,
    interval: Duration,
    server_addr: &str,
    tls: bool,
    prefer_ipv6: bool,
    shutdown: &CancellationToken,
    backoff: &mut ReconnectTimer,
) -> anyhow::Result<()> {
    let uri = format!(
        "{}://{server_addr}/update",
        if tls { "https" } else { "http" }
    );

    loop {
        let current_time = Instant::now();
        let report = SensorReport {
            sensor_value: querent.read(),
        };

        let resp = http::post_json(&uri, &report, tls, prefer_ipv6).await?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "update rejected: [{}]{}",
                resp.status().as_u16(),
                String::from_utf8_lossy(resp.body())
            );
        }
        backoff.reset();

        debug!("reported sensor_value={}", report.sensor_value);

        // wait out the report interval or ctrl-c
        tokio::select! {
            _ = shutdown.cancelled() => {
                return Ok(());
            }
            _ = sleep_until(current_time + interval) => { /* continue */ }
        }
    }
}
