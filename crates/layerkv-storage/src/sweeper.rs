//! Background expiration sweeper.
//!
//! A Tokio task wakes every `sweep_interval`, runs [`TtlIndex::sweep`] on
//! the blocking pool and hands expired entries to a dispatcher through a
//! bounded queue. The dispatcher calls every registered
//! [`ExpirationListener`] in order. When the queue is full the notification
//! is dropped with a warning, so a slow listener never holds up expiration.
//!
//! Shutdown goes through a `CancellationToken`; [`Sweeper::stop`] waits for
//! an in-flight sweep and then drains the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{display_key, StoreError};
use crate::ttl::{now_ms, ExpiredEntry, TtlIndex};

/// Observer notified with the key and last value of every expired entry.
///
/// Called from a blocking worker thread, never from the sweep itself.
pub trait ExpirationListener: Send + Sync + 'static {
    fn on_expired(&self, key: &[u8], value: &[u8]);
}

impl<F> ExpirationListener for F
where
    F: Fn(&[u8], &[u8]) + Send + Sync + 'static,
{
    fn on_expired(&self, key: &[u8], value: &[u8]) {
        self(key, value)
    }
}

/// Sweeper timing and dispatch settings
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub queue_capacity: usize,
}

/// Handle to the running sweeper.
///
/// Dropping the handle cancels the task without waiting for it.
pub struct Sweeper {
    shutdown_token: CancellationToken,
    sweep_handle: Option<JoinHandle<()>>,
    dispatch_handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop (and a dispatcher when listeners are present)
    pub fn start(
        runtime: &Handle,
        index: Arc<TtlIndex>,
        config: SweeperConfig,
        listeners: Vec<Arc<dyn ExpirationListener>>,
    ) -> Self {
        let shutdown_token = CancellationToken::new();

        let (notify_tx, dispatch_handle) = if listeners.is_empty() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let handle = runtime.spawn_blocking(move || dispatch_loop(rx, listeners));
            (Some(tx), Some(handle))
        };

        let sweep_handle = runtime.spawn(sweep_loop(
            index,
            config.interval,
            notify_tx,
            shutdown_token.clone(),
        ));

        info!(interval_ms = config.interval.as_millis(), "Expiration sweeper started");

        Self {
            shutdown_token,
            sweep_handle: Some(sweep_handle),
            dispatch_handle,
        }
    }

    /// Stop the sweeper, waiting for an in-flight sweep and pending notifications
    pub async fn stop(&mut self) {
        self.shutdown_token.cancel();

        if let Some(handle) = self.sweep_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sweep task ended abnormally");
            }
        }
        // The sweep task owned the only sender, so the dispatcher drains and exits
        if let Some(handle) = self.dispatch_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiration dispatcher ended abnormally");
            }
        }

        info!("Expiration sweeper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sweep_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

async fn sweep_loop(
    index: Arc<TtlIndex>,
    interval: Duration,
    notify_tx: Option<mpsc::Sender<ExpiredEntry>>,
    shutdown_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                debug!("Expiration sweeper received shutdown signal");
                return;
            }
            _ = ticker.tick() => {}
        }

        let sweep_index = Arc::clone(&index);
        let report = match tokio::task::spawn_blocking(move || sweep_index.sweep(now_ms())).await {
            Ok(Ok(report)) => report,
            Ok(Err(StoreError::Closed)) => {
                warn!("Engine closed under a running sweeper; stopping");
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Sweep failed; retrying next tick");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Sweep task panicked; retrying next tick");
                continue;
            }
        };

        let Some(tx) = &notify_tx else {
            continue;
        };
        for entry in report.expired {
            match tx.try_send(entry) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(entry)) => {
                    warn!(key = %display_key(&entry.key), "Listener queue full, dropping expiration notice");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("Expiration dispatcher gone, dropping notices");
                    break;
                }
            }
        }
    }
}

fn dispatch_loop(
    mut notify_rx: mpsc::Receiver<ExpiredEntry>,
    listeners: Vec<Arc<dyn ExpirationListener>>,
) {
    while let Some(entry) = notify_rx.blocking_recv() {
        for listener in &listeners {
            listener.on_expired(&entry.key, &entry.value);
        }
    }
    debug!("Expiration dispatcher drained");
}
