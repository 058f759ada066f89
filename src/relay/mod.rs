//! Best-effort forwarding of page views to an Umami-compatible collector
//!
//! `EventRelay` owns a bounded queue drained by a fixed pool of workers:
//! - `track` never blocks; a full queue drops the event
//! - the collector identity (base URL, website id) is resolved once, with
//!   bounded retries, before the relay accepts events
//! - send failures are logged and counted, never retried or surfaced to callers

pub mod client;
pub mod dispatcher;

pub use client::CollectorClient;
pub use dispatcher::{EventRelay, RelayCounters};

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of dispatch workers
pub const DEFAULT_WORKERS: usize = 4;

/// Identity resolution attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// One page view waiting to be forwarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackEvent {
    pub path: String,
    /// Host without port
    pub hostname: String,
    pub title: String,
    pub language: String,
    pub referrer: String,
    /// End-user agent, forwarded as the `User-Agent` header
    pub user_agent: String,
    /// End-user address, forwarded as `X-Forwarded-For`
    pub ip: String,
}

/// Collector base URL and the tracked website id, fixed once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsEndpointIdentity {
    pub base_url: String,
    pub website_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RelayState {
    Uninitialized = 0,
    ResolvingIdentity = 1,
    Ready = 2,
    Draining = 3,
    Stopped = 4,
    /// Identity resolution exhausted its attempts
    Failed = 5,
}

impl RelayState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => RelayState::Uninitialized,
            1 => RelayState::ResolvingIdentity,
            2 => RelayState::Ready,
            3 => RelayState::Draining,
            4 => RelayState::Stopped,
            _ => RelayState::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub url: String,
    /// Skips identity resolution when set
    pub website_id: Option<String>,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
    pub send_timeout: Duration,
}

impl RelayOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            website_id: None,
            username: String::new(),
            password: String::new(),
            domain: String::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("collector unavailable after {attempts} attempts: {last_error}")]
    UpstreamUnavailable { attempts: u32, last_error: String },
    #[error("collector request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("collector responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("relay is {0:?}, expected {1:?}")]
    InvalidState(RelayState, RelayState),
}
