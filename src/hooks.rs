//! External action hooks
//!
//! NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
//! Implementation: Fires a local command and/or an HTTP POST when a
//! configured action (upload, download, delete) completes. Dispatch is
//! fire-and-forget on a bounded queue drained by a fixed worker pool;
//! failures are logged and never reach the request path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Actions that can trigger hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookAction {
    Upload,
    Download,
    Delete,
}

impl HookAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookAction::Upload => "upload",
            HookAction::Download => "download",
            HookAction::Delete => "delete",
        }
    }
}

/// One completed operation, as delivered to the sinks
///
/// The HTTP sink posts this as JSON; `path` carries the absolute host
/// path, the virtual path stays server-side.
#[derive(Debug, Clone, Serialize)]
pub struct HookEvent {
    pub action: HookAction,
    pub username: String,
    #[serde(skip)]
    pub virtual_path: String,
    #[serde(rename = "path")]
    pub absolute_path: PathBuf,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

/// Hook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Actions that fire hooks; empty disables dispatch entirely
    pub execute_on: Vec<HookAction>,
    /// Local command to execute per event
    pub command: Option<PathBuf>,
    /// HTTP endpoint receiving a JSON POST per event
    pub http_notification_url: Option<String>,
    /// Worker tasks draining the queue
    pub workers: usize,
    /// Queue capacity; events beyond it are dropped with a warning
    pub queue_size: usize,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            execute_on: Vec::new(),
            command: None,
            http_notification_url: None,
            workers: 2,
            queue_size: 64,
        }
    }
}

impl HookConfig {
    fn has_sink(&self) -> bool {
        self.command.is_some() || self.http_notification_url.is_some()
    }

    fn fires_on(&self, action: HookAction) -> bool {
        self.execute_on.contains(&action)
    }
}

/// Fire-and-forget hook dispatcher
///
/// NIST 800-53: AU-12 (Audit Generation)
pub struct HookDispatcher {
    config: HookConfig,
    tx: Option<mpsc::Sender<HookEvent>>,
}

impl HookDispatcher {
    /// Create a dispatcher and spawn its worker pool
    ///
    /// Must be called from within a tokio runtime when any sink is
    /// configured. With no sink or no enabled action, enqueue is a no-op
    /// and no workers are spawned.
    pub fn new(config: HookConfig) -> Arc<Self> {
        if !config.has_sink() || config.execute_on.is_empty() {
            return Arc::new(Self { config, tx: None });
        }

        let (tx, rx) = mpsc::channel::<HookEvent>(config.queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        for _ in 0..config.workers.max(1) {
            let rx = rx.clone();
            let client = client.clone();
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let event = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match event {
                        Some(event) => deliver(&config, &client, event).await,
                        None => break,
                    }
                }
            });
        }

        Arc::new(Self {
            config,
            tx: Some(tx),
        })
    }

    /// A dispatcher with no sinks, for contexts without hooks
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            config: HookConfig::default(),
            tx: None,
        })
    }

    /// Queue an event for delivery; never blocks, never fails the caller
    pub fn enqueue(&self, event: HookEvent) {
        if !self.config.fires_on(event.action) {
            return;
        }
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(event) {
            warn!(
                event = "hook_queue_full",
                error = %e,
                "Dropping hook event, queue is full"
            );
        }
    }
}

async fn deliver(config: &HookConfig, client: &reqwest::Client, event: HookEvent) {
    if let Some(command) = &config.command {
        run_command(command, &event).await;
    }
    if let Some(url) = &config.http_notification_url {
        post_notification(client, url, &event).await;
    }
}

async fn run_command(command: &PathBuf, event: &HookEvent) {
    let result = tokio::process::Command::new(command)
        .env("SFTPGO_ACTION", event.action.as_str())
        .env("SFTPGO_USERNAME", &event.username)
        .env("SFTPGO_PATH", &event.absolute_path)
        .env("SFTPGO_SIZE", event.size.to_string())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {
            debug!(
                event = "hook_command_completed",
                action = event.action.as_str(),
                "Hook command completed"
            );
        }
        Ok(status) => warn!(
            event = "hook_command_failed",
            action = event.action.as_str(),
            code = ?status.code(),
            "Hook command exited with failure"
        ),
        Err(e) => warn!(
            event = "hook_command_failed",
            action = event.action.as_str(),
            error = %e,
            "Hook command could not be started"
        ),
    }
}

async fn post_notification(client: &reqwest::Client, url: &str, event: &HookEvent) {
    match client.post(url).json(event).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(
                event = "hook_notification_sent",
                action = event.action.as_str(),
                "Hook notification delivered"
            );
        }
        Ok(response) => warn!(
            event = "hook_notification_failed",
            action = event.action.as_str(),
            status = %response.status(),
            "Hook endpoint returned an error"
        ),
        Err(e) => warn!(
            event = "hook_notification_failed",
            action = event.action.as_str(),
            error = %e,
            "Hook notification could not be sent"
        ),
    }
}
