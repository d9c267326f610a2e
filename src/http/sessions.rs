//! Open import sessions, keyed by session id
//!
//! Each session sits behind its own mutex. A held lock means a call is in
//! flight; readers use the session's watch channel instead of waiting.
//! Sessions nobody has touched for the configured idle period are dropped by
//! a background sweep.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex, OwnedMutexGuard, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::import::{ImportSession, WorkflowState};

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub device_id: String,
    pub opened_at: String,
    pub state: WorkflowState,
}

pub struct SessionHandle {
    session: Arc<Mutex<ImportSession>>,
    state: watch::Receiver<WorkflowState>,
    device_id: String,
    opened_at: String,
    last_active_ms: AtomicI64,
}

/// Upper bound on the time between two expiry sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl SessionHandle {
    fn new(session: ImportSession) -> Self {
        Self {
            state: session.subscribe(),
            device_id: session.device().id.clone(),
            opened_at: session
                .opened_at()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            session: Arc::new(Mutex::new(session)),
            last_active_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self, now_ms: i64) -> Duration {
        let idle_ms = now_ms - self.last_active_ms.load(Ordering::Relaxed);
        Duration::from_millis(u64::try_from(idle_ms).unwrap_or(0))
    }

    fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// `None` while another request is driving the session.
    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<ImportSession>> {
        self.session.clone().try_lock_owned().ok()
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    pub fn view(&self, session_id: Uuid) -> SessionView {
        SessionView {
            session_id,
            device_id: self.device_id.clone(),
            opened_at: self.opened_at.clone(),
            state: self.state(),
        }
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: ImportSession) -> (Uuid, Arc<SessionHandle>) {
        let session_id = Uuid::new_v4();
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions
            .write()
            .await
            .insert(session_id, handle.clone());
        (session_id, handle)
    }

    /// Looks up a session and marks it active.
    pub async fn get(&self, session_id: Uuid) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.read().await.get(&session_id).cloned()?;
        handle.touch();
        Some(handle)
    }

    pub async fn remove(&self, session_id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn open_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions idle for at least `max_idle`. A session with a call in
    /// flight is kept regardless of age.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session_id, handle| {
            let keep = handle.idle_for(now_ms) < max_idle || handle.is_busy();
            if !keep {
                debug!(
                    session_id = %session_id,
                    device_id = %handle.device_id,
                    "expiring idle import session"
                );
            }
            keep
        });
        before - sessions.len()
    }
}

/// Spawns the background task that expires idle sessions. Runs until the
/// runtime shuts down.
pub fn start_expiry_sweep(store: Arc<SessionStore>, max_idle: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = max_idle.clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL);
        let mut interval = tokio::time::interval(period);
        info!(
            max_idle_secs = max_idle.as_secs(),
            "import session expiry sweep started"
        );

        loop {
            interval.tick().await;
            let expired = store.expire_idle(max_idle).await;
            if expired > 0 {
                info!(expired, "expired idle import sessions");
            }
        }
    })
}
