use crate::error::HarvestError;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

/// A chromedriver child process, killed when dropped.
pub struct DriverProcess {
    child: Child,
}

impl DriverProcess {
    /// Launch `binary` listening on the port of `webdriver_url` and wait
    /// until it accepts connections.
    pub async fn spawn(binary: &Path, webdriver_url: &str) -> Result<Self> {
        let url = Url::parse(webdriver_url)
            .with_context(|| format!("Invalid WebDriver URL {}", webdriver_url))?;
        let host = url.host_str().unwrap_or("localhost").to_string();
        let port = url.port_or_known_default().unwrap_or(9515);

        info!("Starting {:?} on port {}", binary, port);
        let child = Command::new(binary)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarvestError::DriverLaunch(binary.to_path_buf(), e))?;

        for attempt in 1..=20 {
            if TcpStream::connect((host.as_str(), port)).await.is_ok() {
                debug!("Driver accepting connections after {} probes", attempt);
                return Ok(Self { child });
            }
            sleep(Duration::from_millis(250)).await;
        }

        Err(HarvestError::Session {
            url: webdriver_url.to_string(),
            reason: "driver did not start listening".into(),
        }
        .into())
    }

    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("Driver already gone: {}", e);
        }
    }
}
