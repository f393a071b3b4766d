//! Readiness probing: poll the backend's `/status` endpoint until it answers.

use async_trait::async_trait;
use std::time::Duration;

/// Health endpoint served by the backend.
pub const STATUS_PATH: &str = "/status";

const DEFAULT_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Readiness of one launch attempt. `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Attempt `attempt` (counting from 1) is about to run.
    Probing { attempt: u32 },
    /// The backend answered on attempt `attempts`.
    Ready { attempts: u32 },
    /// No successful answer in `attempts` tries.
    Failed { attempts: u32 },
}

impl Readiness {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Readiness::Probing { .. })
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    /// State after one probe attempt returned `ok`, given the attempt budget.
    pub fn after_attempt(self, ok: bool, max_attempts: u32) -> Readiness {
        match self {
            Readiness::Probing { attempt } if ok => Readiness::Ready { attempts: attempt },
            Readiness::Probing { attempt } if attempt >= max_attempts => {
                Readiness::Failed { attempts: attempt }
            }
            Readiness::Probing { attempt } => Readiness::Probing {
                attempt: attempt + 1,
            },
            terminal => terminal,
        }
    }
}

/// Retry budget for one launch. Default: 60 attempts 100 ms apart (about 6 s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Upper bound on a single health request, so a backend that accepts the
    /// connection but never answers still counts as one failed attempt.
    pub request_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProbePolicy {
    /// Effective attempt budget; at least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// One health check against a backend port. `Err` carries a human-readable reason.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, port: u16) -> Result<(), String>;
}

/// `GET http://127.0.0.1:<port>/status`; any status below 400 counts as healthy.
#[derive(Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpHealthCheck {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                log::warn!("health client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            client,
            request_timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, port: u16) -> Result<(), String> {
        let url = status_url(port);
        let res = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = res.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(format!("{} returned {}", url, status));
        }
        Ok(())
    }
}

pub fn status_url(port: u16) -> String {
    format!("http://127.0.0.1:{}{}", port, STATUS_PATH)
}

/// Probe `port` over HTTP until ready or the budget in `policy` runs out.
pub async fn probe(port: u16, policy: &ProbePolicy) -> Readiness {
    let check = HttpHealthCheck::new(policy.request_timeout);
    probe_with(&check, port, policy).await
}

/// Probe loop over any [`HealthCheck`]. Failed attempts are quiet except the last one.
pub async fn probe_with(check: &dyn HealthCheck, port: u16, policy: &ProbePolicy) -> Readiness {
    let max_attempts = policy.attempts();
    let mut state = Readiness::Probing { attempt: 1 };
    while let Readiness::Probing { attempt } = state {
        let result = check.check(port).await;
        state = state.after_attempt(result.is_ok(), max_attempts);
        let level = attempt_log_level(state);
        match &result {
            Ok(()) => log::log!(level, "backend on port {} ready after {} attempt(s)", port, attempt),
            Err(e) => log::log!(
                level,
                "backend on port {} not ready (attempt {}/{}): {}",
                port,
                attempt,
                max_attempts,
                e
            ),
        }
        if !state.is_terminal() {
            tokio::time::sleep(policy.interval).await;
        }
    }
    state
}

/// Log level for the attempt that produced `state`. Only the attempt that exhausts the
/// budget is an error.
fn attempt_log_level(state: Readiness) -> log::Level {
    match state {
        Readiness::Ready { .. } => log::Level::Info,
        Readiness::Failed { .. } => log::Level::Error,
        Readiness::Probing { .. } => log::Level::Debug,
    }
}
