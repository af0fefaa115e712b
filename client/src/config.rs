//! Sync configuration.

use crate::error::Result;
use ferry_engine::{ConflictPolicy, Error, PullRequest};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How often a sync attempt is retried after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Try once, never retry.
    pub const fn once() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub const fn fixed(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote; required for the HTTP transport
    pub endpoint: Option<String>,
    /// Maximum retained operations; `None` for unbounded
    pub queue_capacity: Option<usize>,
    /// Operations handed out per dequeue during push
    pub push_batch_size: usize,
    /// Records requested per pull page
    pub pull_page_size: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            queue_capacity: None,
            push_batch_size: 50,
            pull_page_size: PullRequest::DEFAULT_LIMIT,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `FERRY_*` environment variables, reading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `FERRY_ENDPOINT` | `endpoint` |
    /// | `FERRY_QUEUE_CAPACITY` | `queue_capacity` |
    /// | `FERRY_PUSH_BATCH_SIZE` | `push_batch_size` |
    /// | `FERRY_PULL_PAGE_SIZE` | `pull_page_size` |
    /// | `FERRY_REQUEST_TIMEOUT_MS` | `request_timeout` |
    /// | `FERRY_RETRY_ATTEMPTS` | `retry.attempts` |
    /// | `FERRY_RETRY_BACKOFF_MS` | `retry.backoff` |
    /// | `FERRY_CONFLICT_POLICY` | `conflict_policy` (`fail-fast` or `continue`) |
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.endpoint = env::var("FERRY_ENDPOINT").ok();
        if let Some(capacity) = parse_var("FERRY_QUEUE_CAPACITY")? {
            config.queue_capacity = Some(capacity);
        }
        if let Some(size) = parse_var("FERRY_PUSH_BATCH_SIZE")? {
            config.push_batch_size = size;
        }
        if let Some(size) = parse_var("FERRY_PULL_PAGE_SIZE")? {
            config.pull_page_size = size;
        }
        if let Some(ms) = parse_var("FERRY_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var("FERRY_RETRY_ATTEMPTS")? {
            config.retry.attempts = attempts;
        }
        if let Some(ms) = parse_var("FERRY_RETRY_BACKOFF_MS")? {
            config.retry.backoff = Duration::from_millis(ms);
        }
        if let Ok(name) = env::var("FERRY_CONFLICT_POLICY") {
            config.conflict_policy = ConflictPolicy::from_name(&name).ok_or_else(|| {
                Error::Configuration(format!("unknown FERRY_CONFLICT_POLICY {name:?}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Reject values no sync could work with.
    pub fn validate(&self) -> Result<()> {
        if self.push_batch_size == 0 {
            return Err(Error::Configuration("push batch size must be positive".into()));
        }
        if self.pull_page_size == 0 {
            return Err(Error::Configuration("pull page size must be positive".into()));
        }
        if self.retry.attempts == 0 {
            return Err(Error::Configuration("retry attempts must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Configuration("request timeout must be positive".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Configuration(format!("invalid {name} value {value:?}"))),
        Err(_) => Ok(None),
    }
}
