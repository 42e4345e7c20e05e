//! Per-endpoint circuit breaker.
//!
//! Each *action* endpoint carries its own breaker, owned by the local node:
//! it reflects this node's experience calling that endpoint, not a globally
//! shared fact. An OPEN breaker removes the endpoint from the catalog's
//! available view without removing it from the catalog itself.

use crate::events::{notify, LifecycleNotification, NotificationSender};
use meshwork_common::{MeshworkError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Predicate deciding whether a failure counts toward the breaker.
pub type CheckFn = Arc<dyn Fn(&MeshworkError) -> bool + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerOptions {
    /// Whether breakers are created at all.
    ///
    /// Default: false
    pub enabled: bool,
    /// Failure rate (0.0 - 1.0) over the rolling window that trips the
    /// breaker.
    ///
    /// Default: 0.5
    pub threshold: f32,
    /// Length of the rolling failure window.
    ///
    /// Default: 60s
    pub window_time: Duration,
    /// Minimum number of observed calls in the window before the breaker
    /// may trip.
    ///
    /// Default: 20
    pub min_request_count: u32,
    /// How long an OPEN breaker waits before allowing a half-open probe.
    ///
    /// Default: 10s
    pub half_open_time: Duration,
    /// Which failures count toward the breaker. Defaults to
    /// [`MeshworkError::is_countable`]: connectivity and timeout failures
    /// count, business errors surfaced from remote handlers do not.
    pub check: Option<CheckFn>,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        CircuitBreakerOptions {
            enabled: false,
            threshold: 0.5,
            window_time: Duration::from_secs(60),
            min_request_count: 20,
            half_open_time: Duration::from_secs(10),
            check: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .field("window_time", &self.window_time)
            .field("min_request_count", &self.min_request_count)
            .field("half_open_time", &self.half_open_time)
            .field("check", &self.check.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, calls flow through.
    Closed,
    /// Tripped; calls are skipped before dispatch.
    Open,
    /// Recovery timer elapsed; the next call is allowed as a probe.
    HalfOpen,
    /// A half-open probe is in flight; further calls are skipped until it
    /// resolves.
    HalfOpenWait,
}

struct BreakerInner {
    state: BreakerState,
    /// Rolling (timestamp, success) outcomes, pruned to `window_time`.
    window: VecDeque<(Instant, bool)>,
    half_open_timer: Option<JoinHandle<()>>,
}

/// Per-endpoint failure tracker gating catalog availability.
pub struct CircuitBreaker {
    node_id: String,
    action: String,
    opts: CircuitBreakerOptions,
    inner: Mutex<BreakerInner>,
    notifier: NotificationSender,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("node_id", &self.node_id)
            .field("action", &self.action)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(
        node_id: impl Into<String>,
        action: impl Into<String>,
        opts: CircuitBreakerOptions,
        notifier: NotificationSender,
    ) -> Arc<Self> {
        Arc::new(CircuitBreaker {
            node_id: node_id.into(),
            action: action.into(),
            opts,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                half_open_timer: None,
            }),
            notifier,
        })
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Whether the endpoint behind this breaker should be offered by the
    /// catalog's available view.
    pub fn is_available(&self) -> bool {
        if !self.opts.enabled {
            return true;
        }
        matches!(
            self.state(),
            BreakerState::Closed | BreakerState::HalfOpen
        )
    }

    /// Claims the right to dispatch one call.
    ///
    /// In `HalfOpen` this converts the breaker to `HalfOpenWait`, so exactly
    /// one probe goes through; concurrent callers get `RequestSkipped`.
    pub fn acquire(&self) -> Result<()> {
        if !self.opts.enabled {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                inner.state = BreakerState::HalfOpenWait;
                debug!(node_id = %self.node_id, action = %self.action, "half-open probe dispatched");
                Ok(())
            }
            BreakerState::Open | BreakerState::HalfOpenWait => {
                Err(MeshworkError::RequestSkipped {
                    action: self.action.clone(),
                    node_id: self.node_id.clone(),
                })
            }
        }
    }

    /// Records a successful call.
    pub fn on_success(self: &Arc<Self>) {
        if !self.opts.enabled {
            return;
        }
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::HalfOpen | BreakerState::HalfOpenWait => {
                inner.state = BreakerState::Closed;
                inner.window.clear();
                if let Some(timer) = inner.half_open_timer.take() {
                    timer.abort();
                }
                drop(inner);
                debug!(node_id = %self.node_id, action = %self.action, "circuit breaker closed");
                notify(
                    &self.notifier,
                    LifecycleNotification::BreakerClosed {
                        node_id: self.node_id.clone(),
                        action: self.action.clone(),
                    },
                );
            }
            _ => {
                let now = Instant::now();
                inner.window.push_back((now, true));
                Self::prune(&mut inner.window, now, self.opts.window_time);
            }
        }
    }

    /// Records a failed call. Only failures accepted by the `check`
    /// predicate affect breaker state.
    pub fn on_failure(self: &Arc<Self>, error: &MeshworkError) {
        if !self.opts.enabled {
            return;
        }
        let countable = match &self.opts.check {
            Some(check) => check(error),
            None => error.is_countable(),
        };
        if !countable {
            return;
        }

        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::HalfOpen | BreakerState::HalfOpenWait => {
                // The probe failed: reopen immediately and re-arm the timer.
                self.trip(&mut inner);
            }
            BreakerState::Closed => {
                let now = Instant::now();
                inner.window.push_back((now, false));
                Self::prune(&mut inner.window, now, self.opts.window_time);

                let total = inner.window.len() as u32;
                let failures = inner.window.iter().filter(|(_, ok)| !ok).count() as f32;
                if total >= self.opts.min_request_count
                    && failures / total as f32 >= self.opts.threshold
                {
                    self.trip(&mut inner);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Transitions to OPEN and arms the half-open recovery timer. Called
    /// with the inner lock held.
    fn trip(self: &Arc<Self>, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.window.clear();
        if let Some(timer) = inner.half_open_timer.take() {
            timer.abort();
        }

        warn!(node_id = %self.node_id, action = %self.action, "circuit breaker opened");
        notify(
            &self.notifier,
            LifecycleNotification::BreakerOpened {
                node_id: self.node_id.clone(),
                action: self.action.clone(),
            },
        );

        // The OPEN -> HALF_OPEN transition is driven by this timer, not by a
        // check on the next call. The task holds a Weak so a dropped breaker
        // does not linger.
        let weak: Weak<CircuitBreaker> = Arc::downgrade(self);
        let half_open_time = self.opts.half_open_time;
        inner.half_open_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(half_open_time).await;
            if let Some(breaker) = weak.upgrade() {
                breaker.half_open();
            }
        }));
    }

    fn half_open(self: &Arc<Self>) {
        let mut inner = self.inner.lock().expect("breaker lock");
        if inner.state != BreakerState::Open {
            return;
        }
        inner.state = BreakerState::HalfOpen;
        inner.half_open_timer = None;
        drop(inner);

        debug!(node_id = %self.node_id, action = %self.action, "circuit breaker half-opened");
        notify(
            &self.notifier,
            LifecycleNotification::BreakerHalfOpened {
                node_id: self.node_id.clone(),
                action: self.action.clone(),
            },
        );
    }

    fn prune(window: &mut VecDeque<(Instant, bool)>, now: Instant, window_time: Duration) {
        while let Some((ts, _)) = window.front() {
            if now.duration_since(*ts) > window_time {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}
