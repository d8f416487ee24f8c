//! Console port report
//!
//! A launched emulator (`-report-console tcp:<port>`) connects back to the
//! host and writes its console port as ASCII digits.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use ci_droid_core::error::{Result, RunnerError};

/// Sentinel for "no report received"
pub const NO_REPORT: i32 = -1;

/// Where launched emulators report back
#[allow(async_fn_in_trait)]
pub trait ReportChannel {
    type Pending: PendingReport;

    /// Start listening on `port`; must happen before the emulator launches
    async fn listen(&self, port: u16) -> Result<Self::Pending>;
}

/// A report that may still arrive
#[allow(async_fn_in_trait)]
pub trait PendingReport {
    /// Reported console port, or [`NO_REPORT`] if nothing arrived within `timeout`
    async fn console_port(self, timeout: Duration) -> Result<i32>;
}

/// Loopback TCP listener
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpReportChannel;

impl ReportChannel for TcpReportChannel {
    type Pending = TcpPendingReport;

    async fn listen(&self, port: u16) -> Result<Self::Pending> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        debug!("Waiting for emulator report on {:?}", listener.local_addr()?);
        Ok(TcpPendingReport { listener })
    }
}

pub struct TcpPendingReport {
    listener: TcpListener,
}

impl TcpPendingReport {
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }
}

impl PendingReport for TcpPendingReport {
    async fn console_port(self, timeout: Duration) -> Result<i32> {
        let receive = async {
            let (mut stream, peer) = self.listener.accept().await?;
            let mut payload = String::new();
            stream.read_to_string(&mut payload).await?;
            debug!("Emulator report from {}: {:?}", peer, payload.trim());
            Ok::<_, std::io::Error>(payload)
        };

        let payload = match tokio::time::timeout(timeout, receive).await {
            Ok(payload) => payload?,
            Err(_) => {
                warn!("No emulator report within {}s", timeout.as_secs());
                return Ok(NO_REPORT);
            }
        };

        parse_report(&payload)
    }
}

/// Parse the ASCII port number an emulator reports; anything else means the
/// emulator did not start properly
pub fn parse_report(payload: &str) -> Result<i32> {
    let payload = payload.trim();
    payload.parse::<i32>().map_err(|_| {
        RunnerError::EmulatorDidNotStart(format!("emulator reported '{}' instead of a console port", payload))
    })
}
