use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::helper::random_string;

/// How long a reserved but unused session stays valid
pub const RESERVED_TTL: Duration = Duration::from_secs(4 * 60);
/// Ceiling for a session with an upload in progress
pub const UPLOADING_TTL: Duration = Duration::from_secs(23 * 3600);
const REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const SESSION_ID_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPhase {
    Reserved,
    Uploading,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    phase: ReservationPhase,
    expires_at: Instant,
}

type ReservationMap = HashMap<String, HashMap<String, Reservation>>;

struct Inner {
    /// target id -> session id -> reservation
    targets: Mutex<ReservationMap>,
    reaper_started: AtomicBool,
}

/// Chunk session tokens handed out per upload target, with expiry
#[derive(Clone)]
pub struct UploadReservations {
    inner: Arc<Inner>,
}

impl UploadReservations {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                targets: Mutex::new(HashMap::new()),
                reaper_started: AtomicBool::new(false),
            }),
        }
    }

    /// Reserve a fresh session under `target`
    pub fn reserve(&self, target: &str) -> String {
        self.ensure_reaper();
        let session_id = random_string(SESSION_ID_LENGTH);
        self.lock().entry(target.to_string()).or_default().insert(
            session_id.clone(),
            Reservation {
                phase: ReservationPhase::Reserved,
                expires_at: Instant::now() + RESERVED_TTL,
            },
        );
        session_id
    }

    /// Mark a session as uploading and extend its expiry. Returns false when
    /// the session is unknown or already expired.
    pub fn set_uploading(&self, target: &str, session_id: &str) -> bool {
        let now = Instant::now();
        let mut targets = self.lock();
        let Some(sessions) = targets.get_mut(target) else {
            return false;
        };
        match sessions.get_mut(session_id) {
            Some(r) if r.expires_at > now => {
                r.phase = ReservationPhase::Uploading;
                r.expires_at = now + UPLOADING_TTL;
                true
            }
            Some(_) => {
                sessions.remove(session_id);
                false
            }
            None => false,
        }
    }

    pub fn set_complete(&self, target: &str, session_id: &str) {
        let mut targets = self.lock();
        if let Some(sessions) = targets.get_mut(target) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                targets.remove(target);
            }
        }
    }

    #[cfg(test)]
    pub fn phase(&self, target: &str, session_id: &str) -> Option<ReservationPhase> {
        let now = Instant::now();
        self.lock()
            .get(target)
            .and_then(|s| s.get(session_id))
            .filter(|r| r.expires_at > now)
            .map(|r| r.phase)
    }

    /// Live sessions under `target`
    pub fn count(&self, target: &str) -> usize {
        let now = Instant::now();
        self.lock()
            .get(target)
            .map(|s| s.values().filter(|r| r.expires_at > now).count())
            .unwrap_or(0)
    }

    /// Drop expired sessions, returning how many were removed
    pub fn reap(&self) -> usize {
        reap_map(&mut self.lock(), Instant::now())
    }

    fn lock(&self) -> MutexGuard<'_, ReservationMap> {
        self.inner.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One reaper task per registry, started on first use. It holds only a
    /// weak reference and exits once the registry is dropped.
    fn ensure_reaper(&self) {
        if self.inner.reaper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.reaper_started.store(false, Ordering::SeqCst);
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let mut targets = inner.targets.lock().unwrap_or_else(PoisonError::into_inner);
                let removed = reap_map(&mut targets, Instant::now());
                if removed > 0 {
                    tracing::debug!("Reaped {} expired upload reservations", removed);
                }
            }
        });
    }
}

impl Default for UploadReservations {
    fn default() -> Self {
        Self::new()
    }
}

fn reap_map(targets: &mut ReservationMap, now: Instant) -> usize {
    let mut removed = 0;
    targets.retain(|_, sessions| {
        let before = sessions.len();
        sessions.retain(|_, r| r.expires_at > now);
        removed += before - sessions.len();
        !sessions.is_empty()
    });
    removed
}
