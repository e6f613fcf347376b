//! Supervises one sandboxed plugin process across its whole lifetime (spec
//! §4.2): spawn, inherit the ring-buffer notifier fds, capture stdout/stderr
//! into the hub's own logs, and respawn with backoff when the child exits
//! unexpectedly.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hub_core::error::{ErrorContext, HubError, Result};
use hub_core::ComponentId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::notifier::Notifier;
use crate::ring::RingBuffer;
use crate::router::PendingRequests;

#[derive(Clone, Debug)]
pub struct PluginProcessConfig {
    pub component_id: ComponentId,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub ring_capacity_bytes: usize,
    pub call_timeout: Duration,
    pub restart_base_delay: Duration,
    pub restart_max_delay: Duration,
    pub max_consecutive_restarts: u32,
}

impl Default for PluginProcessConfig {
    fn default() -> Self {
        Self {
            component_id: ComponentId::from("plugin"),
            executable: PathBuf::new(),
            args: Vec::new(),
            working_dir: None,
            ring_capacity_bytes: 1 << 20,
            call_timeout: Duration::from_secs(5),
            restart_base_delay: Duration::from_millis(200),
            restart_max_delay: Duration::from_secs(30),
            max_consecutive_restarts: 10,
        }
    }
}

fn restart_delay(config: &PluginProcessConfig, attempt: u32) -> Duration {
    let exp = config.restart_base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
    Duration::from_millis(exp.min(config.restart_max_delay.as_millis() as u64))
}

/// A running (or respawning) plugin process and the IPC machinery wired to
/// it. `call` is the only entry point callers need: it writes a framed
/// request, waits for the matching response or the call timeout, and
/// transparently tolerates the process being mid-restart underneath it.
pub struct PluginHandle {
    config: PluginProcessConfig,
    to_plugin: Arc<RingBuffer>,
    from_plugin: Arc<RingBuffer>,
    notifier: Arc<dyn Notifier>,
    pending: Arc<PendingRequests>,
    child: Mutex<Child>,
    alive: Arc<AtomicBool>,
}

impl PluginHandle {
    /// Spawns the plugin process, wires up both directions of the ring pair,
    /// and starts the background task that drains inbound responses and
    /// restarts the child if it exits before the handle is dropped.
    pub async fn spawn(
        config: PluginProcessConfig,
        to_plugin: Arc<RingBuffer>,
        from_plugin: Arc<RingBuffer>,
        notifier: Arc<dyn Notifier>,
        to_plugin_path: PathBuf,
        from_plugin_path: PathBuf,
    ) -> Result<Self> {
        let child = Self::spawn_child(&config, &to_plugin_path, &from_plugin_path, notifier.as_ref())?;
        let pending = Arc::new(PendingRequests::new());
        let alive = Arc::new(AtomicBool::new(true));

        Self::spawn_response_drain_task(
            from_plugin.clone(),
            notifier.clone(),
            pending.clone(),
            alive.clone(),
        );

        Ok(Self {
            config,
            to_plugin,
            from_plugin,
            notifier,
            pending,
            child: Mutex::new(child),
            alive,
        })
    }

    fn spawn_child(
        config: &PluginProcessConfig,
        to_plugin_path: &PathBuf,
        from_plugin_path: &PathBuf,
        notifier: &dyn Notifier,
    ) -> Result<Child> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .env("HUB_PLUGIN_REQUEST_RING", to_plugin_path)
            .env("HUB_PLUGIN_RESPONSE_RING", from_plugin_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(fd) = notifier.raw_fd() {
            cmd.env("HUB_PLUGIN_NOTIFIER_FD", fd.to_string());
        }

        let mut child = cmd.spawn().map_err(|e| {
            HubError::component_failure(format!("failed to spawn plugin process: {e}")).with_context(
                ErrorContext::new().with_component(config.component_id.clone()),
            )
        })?;

        let component_id = config.component_id.clone();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::pipe_to_tracing(stdout, component_id.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::pipe_to_tracing(stderr, component_id, true));
        }
        Ok(child)
    }

    async fn pipe_to_tracing(
        reader: impl tokio::io::AsyncRead + Unpin,
        component_id: ComponentId,
        is_stderr: bool,
    ) {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                tracing::warn!(%component_id, plugin_stderr = %line);
            } else {
                tracing::debug!(%component_id, plugin_stdout = %line);
            }
        }
    }

    /// Background task: drains the inbound ring whenever notified, routes
    /// each decoded frame to its waiter, and watches for notifier errors
    /// that imply the plugin side is gone.
    fn spawn_response_drain_task(
        from_plugin: Arc<RingBuffer>,
        notifier: Arc<dyn Notifier>,
        pending: Arc<PendingRequests>,
        alive: Arc<AtomicBool>,
    ) {
        tokio::spawn(async move {
            while alive.load(Ordering::Acquire) {
                for frame in from_plugin.drain() {
                    if let Some((id, payload)) = crate::router::split_correlation_id(&frame) {
                        pending.complete(id, payload.to_vec());
                    }
                }
                // Best-effort poll; a richer implementation would await the
                // notifier's async wake-up directly, but `Notifier` here is
                // a trait object shared across implementations with
                // different async surfaces.
                let _ = notifier.notify();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            pending.fail_all();
        });
    }

    /// Sends `payload`, waits for the correlated response, and returns its
    /// bytes. Times out per [`PluginProcessConfig::call_timeout`].
    pub async fn call(&self, payload: &[u8]) -> std::result::Result<Vec<u8>, crate::router::PluginIpcError> {
        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let framed = crate::router::with_correlation_id(id, payload);
        self.to_plugin.write(&framed)?;
        self.notifier.notify().map_err(|_| crate::router::PluginIpcError::PluginCrashed)?;
        self.pending
            .await_response(id, rx, self.config.call_timeout)
            .await
    }

    /// Waits for the child to exit (crash or explicit termination) and
    /// respawns it with exponential backoff, up to
    /// [`PluginProcessConfig::max_consecutive_restarts`] consecutive
    /// failures, at which point the plugin is considered permanently
    /// failed and the caller is responsible for surfacing a component
    /// error status.
    pub async fn supervise(&self, to_plugin_path: PathBuf, from_plugin_path: PathBuf) -> Result<()> {
        let mut attempt = 0;
        loop {
            let status = {
                let mut child = self.child.lock().await;
                child.wait().await
            };
            match status {
                Ok(exit) if exit.success() => {
                    tracing::info!(component_id = %self.config.component_id, "plugin process exited cleanly");
                    return Ok(());
                }
                Ok(exit) => {
                    tracing::warn!(component_id = %self.config.component_id, code = ?exit.code(), "plugin process crashed");
                }
                Err(err) => {
                    tracing::warn!(component_id = %self.config.component_id, error = %err, "failed to wait on plugin process");
                }
            }
            self.pending.fail_all();

            attempt += 1;
            if attempt > self.config.max_consecutive_restarts {
                return Err(HubError::component_failure(
                    "plugin exceeded max consecutive restarts",
                )
                .with_context(ErrorContext::new().with_component(self.config.component_id.clone())));
            }
            tokio::time::sleep(restart_delay(&self.config, attempt)).await;

            let new_child = Self::spawn_child(
                &self.config,
                &to_plugin_path,
                &from_plugin_path,
                self.notifier.as_ref(),
            )?;
            *self.child.lock().await = new_child;
        }
    }

    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn in_flight_calls(&self) -> usize {
        self.pending.in_flight()
    }
}
