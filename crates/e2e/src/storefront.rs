//! Storefront management - optional launch and health checking

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::poll::{poll_until, PollPolicy};

/// How to reach (and optionally start) the storefront under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorefrontConfig {
    /// Program and arguments; `None` means the storefront is already running
    pub launch_command: Option<Vec<String>>,

    /// Working directory for the launched process
    pub working_dir: Option<PathBuf>,

    /// Extra environment for the launched process
    pub env: BTreeMap<String, String>,

    /// Path polled until it answers 2xx
    pub health_path: String,

    pub startup_timeout_ms: u64,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            launch_command: None,
            working_dir: None,
            env: BTreeMap::new(),
            health_path: "/health".to_string(),
            startup_timeout_ms: 60_000,
        }
    }
}

impl StorefrontConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Handle to the storefront for the lifetime of a suite run
pub struct StorefrontHandle {
    child: Option<Child>,
    base_url: String,
}

impl StorefrontHandle {
    /// Launch the storefront if configured, then wait for it to be healthy
    pub async fn start(config: &SuiteConfig) -> E2eResult<Self> {
        let child = match &config.storefront.launch_command {
            Some(command) => Some(spawn(command, config)?),
            None => {
                info!(base_url = %config.base_url, "Using already running storefront");
                None
            }
        };

        let handle = StorefrontHandle {
            child,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        };

        // dropping the handle on failure stops the process again
        handle
            .wait_for_healthy(
                &config.url(&config.storefront.health_path),
                config.timeouts.poll_interval(),
                config.storefront.startup_timeout(),
            )
            .await?;

        info!(base_url = %handle.base_url, "Storefront is healthy");
        Ok(handle)
    }

    /// Wait for the storefront to respond to health checks
    async fn wait_for_healthy(
        &self,
        health_url: &str,
        interval: Duration,
        timeout: Duration,
    ) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let attempts = AtomicUsize::new(0);
        let (client, url, attempts_ref) = (&client, health_url, &attempts);

        let healthy = poll_until(PollPolicy::new(interval, timeout), move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::Relaxed) + 1;
            match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => Ok(Some(())),
                Ok(resp) => {
                    warn!(status = %resp.status(), "Health check returned non-success");
                    Ok(None)
                }
                Err(e) => {
                    if attempt == 1 {
                        info!(url, "Waiting for storefront to start...");
                    }
                    // connection refused is expected while the storefront boots
                    if !e.is_connect() {
                        warn!(error = %e, "Health check error");
                    }
                    Ok(None)
                }
            }
        })
        .await?;

        match healthy {
            Some(()) => Ok(()),
            None => Err(E2eError::ServerHealthCheck(attempts.load(Ordering::Relaxed))),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether this handle owns a launched process
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the storefront if this handle launched it
    pub fn stop(&mut self) -> E2eResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!(pid = child.id(), "Stopping storefront");

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        if matches!(child.try_wait(), Ok(None)) {
            let _ = child.kill();
        }
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for StorefrontHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn spawn(command: &[String], config: &SuiteConfig) -> E2eResult<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| E2eError::Config("storefront.launch_command is empty".to_string()))?;

    info!(program, ?args, "Launching storefront");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("STOREFRONT_BASE_URL", &config.base_url)
        .envs(&config.storefront.env)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
    if let Some(dir) = &config.storefront.working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn()
        .map_err(|e| E2eError::ServerStartup(format!("Failed to spawn {}: {}", program, e)))
}
