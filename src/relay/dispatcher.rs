use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::relay::{
    AnalyticsEndpointIdentity, CollectorClient, RelayError, RelayOptions, RelayState, TrackEvent,
};

/// Point-in-time view of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounters {
    pub enqueued: u64,
    /// Rejected because the queue was full, the relay was not ready, or the event
    /// was still queued at shutdown
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
    pub queue_depth: usize,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<TrackEvent>>>;

/// Bounded-queue dispatcher with a fixed worker pool.
///
/// Lifecycle: `Uninitialized -> ResolvingIdentity -> Ready -> Draining -> Stopped`,
/// or `ResolvingIdentity -> Failed` when the collector never becomes reachable.
pub struct EventRelay {
    options: RelayOptions,
    client: CollectorClient,
    state: AtomicU8,
    identity: OnceLock<AnalyticsEndpointIdentity>,
    counters: Arc<Counters>,
    tx: mpsc::Sender<TrackEvent>,
    rx: SharedReceiver,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl EventRelay {
    pub fn new(options: RelayOptions) -> Result<Self, RelayError> {
        let client = CollectorClient::new(&options.url)?;
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            options,
            client,
            state: AtomicU8::new(RelayState::Uninitialized as u8),
            identity: OnceLock::new(),
            counters: Arc::new(Counters::default()),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    pub fn state(&self) -> RelayState {
        RelayState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RelayState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Resolved collector identity, available once the relay is ready
    pub fn identity(&self) -> Option<&AnalyticsEndpointIdentity> {
        self.identity.get()
    }

    pub fn counters(&self) -> RelayCounters {
        RelayCounters {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queue_depth: self.tx.max_capacity() - self.tx.capacity(),
        }
    }

    /// Resolve the collector identity and start the workers.
    ///
    /// A configured website id is used as is. Otherwise the relay logs in and finds
    /// or creates the website for the configured domain, retrying the whole
    /// sequence up to `max_attempts` times.
    pub async fn initialize(&self) -> Result<(), RelayError> {
        if let Err(current) = self.state.compare_exchange(
            RelayState::Uninitialized as u8,
            RelayState::ResolvingIdentity as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(RelayError::InvalidState(
                RelayState::from_u8(current),
                RelayState::Uninitialized,
            ));
        }

        let website_id = match self.options.website_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => match self.resolve_with_retry().await {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, "Collector identity resolution failed");
                    // A concurrent shutdown already moved the relay to Stopped
                    let _ = self.state.compare_exchange(
                        RelayState::ResolvingIdentity as u8,
                        RelayState::Failed as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return Err(e);
                }
            },
        };

        let identity = AnalyticsEndpointIdentity {
            base_url: self.client.base_url().to_string(),
            website_id,
        };
        let identity = self.identity.get_or_init(|| identity);

        self.spawn_workers(&identity.website_id).await;

        // Shutdown may have raced with resolution
        if self
            .state
            .compare_exchange(
                RelayState::ResolvingIdentity as u8,
                RelayState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(RelayError::InvalidState(
                self.state(),
                RelayState::ResolvingIdentity,
            ));
        }

        info!(
            url = %identity.base_url,
            website_id = %identity.website_id,
            workers = self.options.workers.max(1),
            "Analytics relay ready"
        );
        Ok(())
    }

    async fn resolve_with_retry(&self) -> Result<String, RelayError> {
        let attempts = self.options.max_attempts.max(1);
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                info!(attempt, "Waiting for analytics collector");
                tokio::select! {
                    _ = tokio::time::sleep(self.options.retry_delay) => {}
                    _ = shutdown.wait_for(|stop| *stop) => {
                        return Err(RelayError::UpstreamUnavailable {
                            attempts: attempt - 1,
                            last_error: "shutdown requested".to_string(),
                        });
                    }
                }
            }

            match tokio::time::timeout(self.options.attempt_timeout, self.resolve_once()).await {
                Ok(Ok(id)) => return Ok(id),
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Collector identity attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(attempt, "Collector identity attempt timed out");
                    last_error = "attempt timed out".to_string();
                }
            }
        }

        Err(RelayError::UpstreamUnavailable {
            attempts,
            last_error,
        })
    }

    async fn resolve_once(&self) -> Result<String, RelayError> {
        let opts = &self.options;
        let token = self.client.login(&opts.username, &opts.password).await?;

        if let Some(id) = self.client.find_website(&token, &opts.domain).await? {
            info!(id = %id, domain = %opts.domain, "Found existing collector website");
            return Ok(id);
        }

        let id = self.client.create_website(&token, &opts.domain).await?;
        info!(id = %id, domain = %opts.domain, "Created collector website");
        Ok(id)
    }

    async fn spawn_workers(&self, website_id: &str) {
        let mut workers = self.workers.lock().await;

        for worker_id in 0..self.options.workers.max(1) {
            let worker = Worker {
                id: worker_id,
                client: self.client.clone(),
                website_id: website_id.to_string(),
                send_timeout: self.options.send_timeout,
                rx: Arc::clone(&self.rx),
                counters: Arc::clone(&self.counters),
                shutdown: self.shutdown_tx.subscribe(),
            };
            workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Queue an event without waiting.
    ///
    /// Dropped (and counted) when the queue is full or the relay is not ready.
    pub fn track(&self, event: TrackEvent) {
        if self.state() != RelayState::Ready {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(state = ?self.state(), "Analytics relay not ready, dropping event");
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Analytics event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop accepting events and stop the workers.
    ///
    /// Workers get at most `grace` to finish their in-flight send; stragglers are
    /// aborted. Events still queued are discarded and counted as dropped.
    pub async fn shutdown(&self, grace: Duration) {
        let previous = self.state();
        if previous == RelayState::Stopped {
            return;
        }
        if previous == RelayState::Ready {
            self.set_state(RelayState::Draining);
        }

        self.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        let deadline = Instant::now() + grace;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("Analytics worker did not stop in time, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }

        let mut discarded = 0;
        {
            let mut rx = self.rx.lock().await;
            // A track that raced past the state check now fails with Closed
            rx.close();
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }
        self.counters.dropped.fetch_add(discarded, Ordering::Relaxed);

        if previous != RelayState::Failed {
            self.set_state(RelayState::Stopped);
        }

        let counters = self.counters();
        info!(
            enqueued = counters.enqueued,
            sent = counters.sent,
            failed = counters.failed,
            dropped = counters.dropped,
            "Analytics relay stopped"
        );
    }
}

struct Worker {
    id: usize,
    client: CollectorClient,
    website_id: String,
    send_timeout: Duration,
    rx: SharedReceiver,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.id, "Analytics worker started");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => break,
                event = next_event(&self.rx) => event,
            };

            let Some(event) = event else {
                break;
            };

            match self
                .client
                .send(&self.website_id, &event, self.send_timeout)
                .await
            {
                Ok(()) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(worker = self.id, path = %event.path, error = %e, "Failed to send analytics event");
                }
            }
        }

        debug!(worker = self.id, "Analytics worker stopped");
    }
}

async fn next_event(rx: &SharedReceiver) -> Option<TrackEvent> {
    rx.lock().await.recv().await
}
