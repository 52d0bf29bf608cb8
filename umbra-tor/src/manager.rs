//! Circuit pool
//!
//! The manager hands out [`CircuitLease`]s, each holding one of a session's
//! concurrency permits. Sessions are rotated after a request budget or a run
//! of consecutive failures; a retired circuit is closed in the background
//! once its last lease has been dropped.

use chrono::{DateTime, Utc};
use futures::future::select_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use umbra_core::{CancellationToken, TransportConfig};

use crate::{AnonymityTransport, TransportError, TransportResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// At least one failure since the last success
    Degraded,
    Retired,
}

/// Snapshot of one circuit's bookkeeping
#[derive(Debug, Clone)]
pub struct CircuitSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub request_count: u64,
    pub consecutive_failures: u32,
    pub state: SessionState,
}

impl CircuitSession {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            request_count: 0,
            consecutive_failures: 0,
            state: SessionState::Active,
        }
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHealth {
    pub active: usize,
    pub degraded: usize,
    /// Sessions retired since the manager was created
    pub retired: u64,
    /// Circuit creation was exhausted and has not succeeded since
    pub degraded_mode: bool,
}

/// One concurrency slot on one circuit
#[derive(Debug)]
pub struct CircuitLease {
    session_id: Uuid,
    _permit: OwnedSemaphorePermit,
}

impl CircuitLease {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

struct SessionSlot {
    session: CircuitSession,
    permits: Arc<Semaphore>,
}

#[derive(Default)]
struct Pool {
    sessions: Vec<SessionSlot>,
    /// Sessions being created, counted against `max_sessions`
    creating: usize,
}

/// Reservation against `max_sessions` for one circuit being created.
///
/// Dropping it unfinished (the acquiring future was cancelled or timed out)
/// gives the slot back.
struct CreationSlot<'a> {
    pool: &'a Mutex<Pool>,
    armed: bool,
}

impl<'a> CreationSlot<'a> {
    /// Caller must already have counted the slot in `pool.creating`
    fn new(pool: &'a Mutex<Pool>) -> Self {
        Self { pool, armed: true }
    }

    /// Release the slot under a lock the caller already holds
    fn finish(mut self, pool: &mut Pool) {
        pool.creating -= 1;
        self.armed = false;
    }
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.lock().creating -= 1;
        }
    }
}

/// Pool of anonymized circuits over an [`AnonymityTransport`]
pub struct TransportManager {
    transport: Arc<dyn AnonymityTransport>,
    config: TransportConfig,
    pool: Mutex<Pool>,
    degraded_mode: AtomicBool,
    retired: AtomicU64,
}

impl TransportManager {
    pub fn new(transport: Arc<dyn AnonymityTransport>, config: TransportConfig) -> Self {
        Self {
            transport,
            config,
            pool: Mutex::new(Pool::default()),
            degraded_mode: AtomicBool::new(false),
            retired: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_mode.load(Ordering::SeqCst)
    }

    /// Obtain a concurrency slot on a live circuit, creating one if the pool has room.
    ///
    /// Waits at most `acquire_timeout` for a slot when the pool is saturated.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<CircuitLease, TransportError> {
        let deadline = tokio::time::Instant::now() + self.config.acquire_timeout();

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let waiters = {
                let mut pool = self.pool.lock();
                if let Some(lease) = Self::lease_from(&pool) {
                    return Ok(lease);
                }
                if pool.sessions.len() + pool.creating < self.config.max_sessions {
                    pool.creating += 1;
                    None
                } else {
                    Some(
                        pool.sessions
                            .iter()
                            .map(|s| (s.session.id, s.permits.clone()))
                            .collect::<Vec<_>>(),
                    )
                }
            };

            match waiters {
                None => {
                    let slot = CreationSlot::new(&self.pool);
                    let created = self.open_session(cancel).await;
                    let mut pool = self.pool.lock();
                    slot.finish(&mut pool);
                    let id = created?;
                    let permits = Arc::new(Semaphore::new(self.config.per_session_concurrency));
                    let permit = permits.clone().try_acquire_owned().ok();
                    pool.sessions.push(SessionSlot {
                        session: CircuitSession::new(id),
                        permits,
                    });
                    info!("Circuit {} opened ({} in pool)", id, pool.sessions.len());
                    if let Some(permit) = permit {
                        return Ok(CircuitLease {
                            session_id: id,
                            _permit: permit,
                        });
                    }
                }
                Some(waiters) if waiters.is_empty() => {
                    // every slot is mid-creation elsewhere
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = tokio::time::sleep_until(deadline) => {
                            return Err(TransportError::Timeout(self.config.acquire_timeout()));
                        }
                        _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                    }
                }
                Some(waiters) => {
                    let pending = waiters.into_iter().map(|(id, permits)| {
                        Box::pin(async move { (id, permits.acquire_owned().await) })
                    });

                    let ((id, permit), _, _) = tokio::select! {
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = tokio::time::sleep_until(deadline) => {
                            return Err(TransportError::Timeout(self.config.acquire_timeout()));
                        }
                        ready = select_all(pending) => ready,
                    };

                    if let Ok(permit) = permit {
                        if self.is_live(id) {
                            return Ok(CircuitLease {
                                session_id: id,
                                _permit: permit,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Issue a request over the leased circuit and update rotation bookkeeping
    pub async fn request(
        &self,
        lease: &mut CircuitLease,
        url: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        let id = lease.session_id;
        let call = tokio::time::timeout(timeout, self.transport.request(id, url, timeout));

        let result = match cancel.run_until_cancelled(call).await {
            None => return Err(TransportError::Cancelled),
            Some(Err(_elapsed)) => Err(TransportError::Timeout(timeout)),
            Some(Ok(result)) => result,
        };

        self.record_outcome(id, result.is_ok());
        result
    }

    /// Retire a session; the next acquire uses or creates another one
    pub fn rotate(&self, session_id: Uuid) -> bool {
        let slot = {
            let mut pool = self.pool.lock();
            let Some(idx) = pool.sessions.iter().position(|s| s.session.id == session_id) else {
                return false;
            };
            pool.sessions.remove(idx)
        };
        self.retire(slot);
        true
    }

    /// Retire every live session
    pub fn shutdown(&self) {
        let slots: Vec<SessionSlot> = self.pool.lock().sessions.drain(..).collect();
        for slot in slots {
            self.retire(slot);
        }
    }

    pub fn health(&self) -> TransportHealth {
        let pool = self.pool.lock();
        let count = |state| pool.sessions.iter().filter(|s| s.session.state == state).count();
        TransportHealth {
            active: count(SessionState::Active),
            degraded: count(SessionState::Degraded),
            retired: self.retired.load(Ordering::SeqCst),
            degraded_mode: self.is_degraded(),
        }
    }

    /// Live sessions, oldest first
    pub fn sessions(&self) -> Vec<CircuitSession> {
        self.pool.lock().sessions.iter().map(|s| s.session.clone()).collect()
    }

    /// Least-loaded live session with a free permit
    fn lease_from(pool: &Pool) -> Option<CircuitLease> {
        let slot = pool
            .sessions
            .iter()
            .filter(|s| s.permits.available_permits() > 0)
            .max_by_key(|s| s.permits.available_permits())?;

        let permit = slot.permits.clone().try_acquire_owned().ok()?;
        Some(CircuitLease {
            session_id: slot.session.id,
            _permit: permit,
        })
    }

    fn is_live(&self, session_id: Uuid) -> bool {
        self.pool.lock().sessions.iter().any(|s| s.session.id == session_id)
    }

    async fn open_session(&self, cancel: &CancellationToken) -> Result<Uuid, TransportError> {
        // degraded mode: one attempt per acquire until a creation succeeds
        let attempts = if self.is_degraded() {
            1
        } else {
            self.config.session_retry_attempts.max(1)
        };
        let mut delay = self.config.session_retry_base();
        let mut last = String::new();

        for attempt in 1..=attempts {
            let id = Uuid::new_v4();
            match cancel.run_until_cancelled(self.transport.connect(id)).await {
                None => return Err(TransportError::Cancelled),
                Some(Ok(())) => {
                    if self.degraded_mode.swap(false, Ordering::SeqCst) {
                        info!("Circuit creation recovered, leaving degraded mode");
                    }
                    return Ok(id);
                }
                Some(Err(e)) => {
                    warn!("Circuit creation attempt {}/{} failed: {}", attempt, attempts, e);
                    last = e.to_string();
                }
            }

            if attempt < attempts {
                if cancel.run_until_cancelled(tokio::time::sleep(delay)).await.is_none() {
                    return Err(TransportError::Cancelled);
                }
                delay = delay.mul_f64(self.config.session_retry_factor);
            }
        }

        if !self.degraded_mode.swap(true, Ordering::SeqCst) {
            warn!("Circuit creation exhausted, entering degraded mode");
        }
        Err(TransportError::Exhausted { attempts, last })
    }

    fn record_outcome(&self, session_id: Uuid, success: bool) {
        let retiring = {
            let mut pool = self.pool.lock();
            let Some(idx) = pool.sessions.iter().position(|s| s.session.id == session_id) else {
                // already retired; in-flight requests do not count
                return;
            };

            let session = &mut pool.sessions[idx].session;
            session.request_count += 1;
            if success {
                session.consecutive_failures = 0;
                session.state = SessionState::Active;
            } else {
                session.consecutive_failures += 1;
                session.state = SessionState::Degraded;
            }

            let exhausted = session.request_count >= self.config.rotate_after_requests;
            let failing = session.consecutive_failures >= self.config.max_consecutive_failures;
            if exhausted || failing {
                debug!(
                    "Rotating circuit {} (requests={}, failures={})",
                    session_id, session.request_count, session.consecutive_failures
                );
                Some(pool.sessions.remove(idx))
            } else {
                None
            }
        };

        if let Some(slot) = retiring {
            self.retire(slot);
        }
    }

    /// Close the circuit once every outstanding permit is back
    fn retire(&self, mut slot: SessionSlot) {
        slot.session.state = SessionState::Retired;
        self.retired.fetch_add(1, Ordering::SeqCst);

        let id = slot.session.id;
        let permits = slot.permits;
        let all = self.config.per_session_concurrency as u32;
        let transport = self.transport.clone();

        info!("Circuit {} retired after {} requests", id, slot.session.request_count);
        tokio::spawn(async move {
            let _drained = permits.acquire_many_owned(all).await;
            transport.close(id).await;
        });
    }
}
