/// 定时刷新任务状态
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::TaskStore;

pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(300);

/// Why a status refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// The periodic timer fired.
    Tick,
    /// The application came back to the foreground.
    Resumed,
}

/// Sends a `Tick` every period until cancelled.
///
/// The timer never touches the store; the store's owner receives triggers and
/// applies them, so every mutation stays on one task.
pub struct RefreshTimer {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTimer {
    pub fn spawn(period: Duration, tx: mpsc::Sender<RefreshTrigger>) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            // 第一次触发在一个周期之后，而不是立即触发
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(RefreshTrigger::Tick).await.is_err() {
                            debug!("refresh receiver dropped, stopping timer");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the timer task to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Turns SIGCONT (the process was brought back to the foreground) into
/// `Resumed` triggers.
#[cfg(unix)]
pub struct ResumeListener {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl ResumeListener {
    pub fn spawn(tx: mpsc::Sender<RefreshTrigger>) -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut resumed = signal(SignalKind::from_raw(libc::SIGCONT))?;
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    received = resumed.recv() => {
                        if received.is_none() {
                            break;
                        }
                        if tx.send(RefreshTrigger::Resumed).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(unix)]
impl Drop for ResumeListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Apply one trigger to the store. Returns true if any status changed.
pub fn apply_trigger(store: &mut TaskStore, trigger: RefreshTrigger, now: DateTime<Utc>) -> bool {
    let changed = store.refresh_statuses(now);
    debug!(?trigger, changed, "applied refresh trigger");
    changed
}
