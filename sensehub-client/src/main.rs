#![forbid(unsafe_code)]

use std::time::Duration;

use argh::FromArgs;
use simple_logger::SimpleLogger;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::sensor::{SensorQuerent, SensorSource};

mod http;
mod report;
mod sensor;
mod watch;

#[derive(FromArgs, Debug)]
#[argh(description = "A lightweight sensor station agent.")]
struct AgentConfig {
    #[argh(
        option,
        short = 'a',
        default = "\"127.0.0.1:5000\".to_string()",
        description = "server address to connect to"
    )]
    pub server_addr: String,
    #[argh(
        switch,
        short = 't',
        description = "use TLS to connect to server (https/wss instead of http/ws)"
    )]
    pub tls: bool,
    #[argh(
        switch,
        short = '6',
        description = "prefer IPv6 when resolving server address"
    )]
    pub prefer_ipv6: bool,
    #[argh(
        option,
        short = 'i',
        default = "5",
        description = "seconds between two sensor reports"
    )]
    pub interval: u64, // in seconds
    #[argh(
        option,
        default = "SensorSource::Cpu",
        description = "local quantity to report: cpu or memory"
    )]
    pub source: SensorSource,
    #[argh(
        switch,
        short = 'w',
        description = "hold a websocket open against the server instead of reporting"
    )]
    pub watch: bool,
    #[argh(
        option,
        default = "1",
        description = "minimum interval between two connection retries in seconds"
    )]
    pub retry_minimum_interval: u64, // in seconds
    #[argh(
        option,
        default = "300",
        description = "maximum interval between two connection retries in seconds"
    )]
    pub retry_maximum_interval: u64, // in seconds
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new().env().init()?;

    let cfg: AgentConfig = argh::from_env();
    log::debug!("Agent config: {cfg:#?}");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            shutdown.cancel();
        }
    });

    let mut querent = SensorQuerent::new(cfg.source);
    let mut reconnect_timer = ReconnectTimer::new(
        Duration::from_secs(cfg.retry_minimum_interval),
        Duration::from_secs(cfg.retry_maximum_interval),
    );

    loop {
        let res: anyhow::Result<()> = if cfg.watch {
            watch::run(
                &cfg.server_addr,
                cfg.tls,
                cfg.prefer_ipv6,
                &shutdown,
                &mut reconnect_timer,
            )
            .await
        } else {
            report::run(
                &mut querent,
                Duration::from_secs(cfg.interval),
                &cfg.server_addr,
                cfg.tls,
                cfg.prefer_ipv6,
                &shutdown,
                &mut reconnect_timer,
            )
            .await
        };

        match res {
            Err(e) => {
                log::warn!("Error occurred: {e}");
                log::info!(
                    "Reconnecting in {} seconds...",
                    reconnect_timer.interval().as_secs()
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = reconnect_timer.wait() => {}
                }
            }
            Ok(()) => return Ok(()), // means graceful shutdown
        }
    }
}

pub(crate) struct ReconnectTimer {
    minimal_interval: Duration,
    maximal_interval: Duration,
    curr_interval: Duration,
}

impl ReconnectTimer {
    fn new(minimal_interval: Duration, maximal_interval: Duration) -> Self {
        debug_assert!(minimal_interval <= maximal_interval);

        Self {
            minimal_interval,
            maximal_interval,
            curr_interval: minimal_interval,
        }
    }

    async fn wait(&mut self) {
        sleep(self.curr_interval).await;
        self.curr_interval = (self.curr_interval * 2).min(self.maximal_interval);
    }

    pub(crate) fn reset(&mut self) {
        self.curr_interval = self.minimal_interval;
    }

    fn interval(&self) -> Duration {
        self.curr_interval
    }
}
