use super::fields;
use super::record::{SessionRecord, decode, to_value};
use super::session::Session;
use super::Tracker;
use crate::core::{RecordId, Result, Status, TrailError};
use crate::store::FieldPatch;
use tokio::runtime::Handle;
use tracing::{Level, event};

/// Mark a session that never reached a terminal state.
///
/// If the stored status is not terminal (`executing`, or a severity raised
/// while running), sets `exception` and `end = now` and returns `true`.
/// Terminal outcomes are left alone, as is a session that no longer exists.
pub async fn mark_abandoned(tracker: &Tracker, id: &RecordId) -> Result<bool> {
    let store = tracker.store();
    let Some(document) = store.find_one(tracker.session_collection(), id).await? else {
        return Ok(false);
    };
    let stored: SessionRecord = decode(document)?;
    if stored.status.is_terminal() {
        return Ok(false);
    }

    let now = tracker.now().await?;
    let patch = FieldPatch::new()
        .set(fields::STATUS, to_value(&Status::Exception)?)
        .set(fields::END, to_value(&now)?);
    store
        .replace_fields(tracker.session_collection(), id, patch)
        .await?;
    event!(Level::WARN, session = %id, "abandoned session marked as exception");
    Ok(true)
}

/// Scope guard over a committed session.
///
/// While armed, leaving the scope by any path (early return, `?`, panic)
/// schedules `mark_abandoned` for the session on the current tokio runtime.
/// `disarm()` once the session has reached its final status.
#[must_use = "dropping the guard immediately marks the session as abandoned"]
#[derive(Debug)]
pub struct SessionGuard {
    tracker: Tracker,
    session: RecordId,
    armed: bool,
}

impl SessionGuard {
    pub fn arm(session: &Session) -> Result<Self> {
        let id = session.id().ok_or(TrailError::NotCommitted("Session"))?;
        Ok(Self {
            tracker: session.tracker().clone(),
            session: id.clone(),
            armed: true,
        })
    }

    pub fn session_id(&self) -> &RecordId {
        &self.session
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Run the abandonment check now instead of on drop.
    pub async fn finalize(mut self) -> Result<bool> {
        self.armed = false;
        mark_abandoned(&self.tracker, &self.session).await
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let tracker = self.tracker.clone();
        let session = self.session.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = mark_abandoned(&tracker, &session).await {
                        event!(Level::ERROR, session = %session, error = %err, "failed to mark abandoned session");
                    }
                });
            }
            Err(_) => {
                event!(
                    Level::ERROR,
                    session = %session,
                    "session guard dropped outside a tokio runtime; session left executing"
                );
            }
        }
    }
}
