//! Generic three-state failure isolator keyed by resource name.
//!
//! One `CircuitBreaker` instance is shared process-wide (held on `AppState`
//! the way the gateway's other registries are) and guards arbitrarily many
//! resource keys — `llm:chat`, `mcp:homeassistant`, etc — each with its own
//! independent state machine.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct ResourceState {
    state: std::sync::Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at_unix_ms: AtomicI64,
    /// Set while a half-open probe call is running, so a second concurrent
    /// `guard` caller fails fast instead of also hitting the resource.
    half_open_probe_in_flight: AtomicBool,
}

impl ResourceState {
    fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at_unix_ms: AtomicI64::new(0),
            half_open_probe_in_flight: AtomicBool::new(false),
        }
    }
}

/// Per-resource breaker configuration. Defaults follow §4.2: 3 consecutive
/// failures to open, 30s recovery for LLM resources, 60s for agent/tool
/// resources — callers pick the recovery timeout that matches their resource.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    pub fn agent() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("circuit open for resource '{resource}'")]
pub struct CircuitOpenError {
    pub resource: String,
}

pub struct CircuitBreaker {
    clock: Box<dyn Clock>,
    resources: DashMap<String, ResourceState>,
    configs: DashMap<String, BreakerConfig>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Box::new(crate::clock::SystemClock))
    }
}

impl CircuitBreaker {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            resources: DashMap::new(),
            configs: DashMap::new(),
        }
    }

    /// Register a non-default config for a resource key. Must be called
    /// before the first `guard`/`state` call for that key to take effect.
    pub fn configure(&self, resource: &str, config: BreakerConfig) {
        self.configs.insert(resource.to_string(), config);
    }

    fn config_for(&self, resource: &str) -> BreakerConfig {
        self.configs
            .get(resource)
            .map(|c| *c)
            .unwrap_or_default()
    }

    fn entry(&self, resource: &str) -> dashmap::mapref::one::Ref<'_, String, ResourceState> {
        self.resources
            .entry(resource.to_string())
            .or_insert_with(ResourceState::new)
            .downgrade()
    }

    pub fn state(&self, resource: &str) -> CircuitState {
        let res = self.entry(resource);
        let cfg = self.config_for(resource);
        self.maybe_transition_to_half_open(&res, &cfg);
        let state = *res.state.lock().unwrap();
        state
    }

    fn maybe_transition_to_half_open(&self, res: &ResourceState, cfg: &BreakerConfig) {
        let mut state = res.state.lock().unwrap();
        if *state == CircuitState::Open {
            let opened_at = res.opened_at_unix_ms.load(Ordering::Acquire);
            let now_ms = self.clock.now().timestamp_millis();
            if now_ms - opened_at >= cfg.recovery_timeout.as_millis() as i64 {
                *state = CircuitState::HalfOpen;
            }
        }
    }

    /// Run `f` through the breaker. Returns `CircuitOpenError` without
    /// invoking `f` when the breaker is OPEN (fail fast) or when a half-open
    /// probe is already in flight for this resource.
    pub async fn guard<F, Fut, T, E>(&self, resource: &str, f: F) -> Result<T, BreakerResult<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let cfg = self.config_for(resource);
        {
            let res = self.entry(resource);
            self.maybe_transition_to_half_open(&res, &cfg);
            let state = *res.state.lock().unwrap();
            match state {
                CircuitState::Open => {
                    return Err(BreakerResult::Open(CircuitOpenError {
                        resource: resource.to_string(),
                    }));
                }
                CircuitState::HalfOpen => {
                    // Only one probe per recovery window: a second concurrent
                    // caller loses the race and fails fast instead of also
                    // calling through.
                    if res
                        .half_open_probe_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return Err(BreakerResult::Open(CircuitOpenError {
                            resource: resource.to_string(),
                        }));
                    }
                }
                CircuitState::Closed => {}
            }
        }

        match f().await {
            Ok(v) => {
                self.record_success(resource);
                Ok(v)
            }
            Err(e) => {
                self.record_failure(resource);
                Err(BreakerResult::Inner(e))
            }
        }
    }

    pub fn record_success(&self, resource: &str) {
        let res = self.entry(resource);
        let mut state = res.state.lock().unwrap();
        res.consecutive_failures.store(0, Ordering::Release);
        res.half_open_probe_in_flight.store(false, Ordering::Release);
        *state = CircuitState::Closed;
    }

    pub fn record_failure(&self, resource: &str) {
        let cfg = self.config_for(resource);
        let res = self.entry(resource);
        let mut state = res.state.lock().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                res.opened_at_unix_ms
                    .store(self.clock.now().timestamp_millis(), Ordering::Release);
                res.consecutive_failures.store(0, Ordering::Release);
                res.half_open_probe_in_flight.store(false, Ordering::Release);
            }
            CircuitState::Closed => {
                let failures = res.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= cfg.failure_threshold {
                    *state = CircuitState::Open;
                    res.opened_at_unix_ms
                        .store(self.clock.now().timestamp_millis(), Ordering::Release);
                }
            }
            CircuitState::Open => {
                // already open; refresh the timer is not required by the
                // spec on failures received while open (callers shouldn't
                // be invoking the wrapped fn in that state anyway).
            }
        }
    }
}

#[derive(Debug)]
pub enum BreakerResult<E> {
    Open(CircuitOpenError),
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerResult<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerResult::Open(e) => write!(f, "{e}"),
            BreakerResult::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerResult<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::default();
        for _ in 0..3 {
            let r: Result<(), BreakerResult<&str>> =
                cb.guard("llm:chat", || async { Err("boom") }).await;
            assert!(matches!(r, Err(BreakerResult::Inner(_))));
        }
        assert_eq!(cb.state("llm:chat"), CircuitState::Open);

        // next call fails fast without invoking the closure
        let mut invoked = false;
        let r: Result<(), BreakerResult<&str>> = cb
            .guard("llm:chat", || {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(r, Err(BreakerResult::Open(_))));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let cb = CircuitBreaker::default();
        let _: Result<(), BreakerResult<&str>> =
            cb.guard("mcp:weather", || async { Err("e") }).await;
        let _: Result<(), BreakerResult<&str>> =
            cb.guard("mcp:weather", || async { Ok(()) }).await;
        assert_eq!(cb.state("mcp:weather"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_only_one_concurrent_probe() {
        let cb = std::sync::Arc::new(CircuitBreaker::new(Box::new(crate::clock::SystemClock)));
        cb.configure(
            "mcp:weather",
            BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(1),
            },
        );
        cb.record_failure("mcp:weather");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state("mcp:weather"), CircuitState::HalfOpen);

        let invocations = std::sync::Arc::new(AtomicU32::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(rx)));

        let cb2 = cb.clone();
        let invocations2 = invocations.clone();
        let rx2 = rx.clone();
        let first = tokio::spawn(async move {
            cb2.guard("mcp:weather", || async move {
                invocations2.fetch_add(1, Ordering::SeqCst);
                let rx = rx2.lock().await.take().unwrap();
                let _ = rx.await;
                Ok::<(), &str>(())
            })
            .await
        });

        // Give the first probe a chance to be admitted before the second fires.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let cb3 = cb.clone();
        let invocations3 = invocations.clone();
        let second: Result<(), BreakerResult<&str>> = cb3
            .guard("mcp:weather", || async move {
                invocations3.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(second, Err(BreakerResult::Open(_))));

        let _ = tx.send(());
        let _ = first.await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn half_open_transition_after_recovery_timeout() {
        let cb = CircuitBreaker::new(Box::new(crate::clock::SystemClock));
        cb.configure(
            "llm:agent",
            BreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(1),
            },
        );
        cb.record_failure("llm:agent");
        assert_eq!(cb.state("llm:agent"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state("llm:agent"), CircuitState::HalfOpen);
        let _ = now_ms();
    }
}
