use crate::core::{PrincipalRef, RecordId, Result, SessionKind, Status, TimeSpec, TrailError};
use crate::store::Criteria;
use crate::tracking::fields;
use crate::tracking::record::{SessionRecord, decode};
use crate::tracking::{Session, SessionGuard, Tracker, mark_abandoned};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// Outcome of one `BatchDriver::run`.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub session_id: RecordId,
    /// Final status written to the session.
    pub status: Status,
    /// Value returned by the operation, when it succeeded.
    pub output: Option<T>,
    /// Rendered error chain for failed or timed-out runs.
    pub failure: Option<String>,
}

impl<T> BatchReport<T> {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

enum Outcome<T> {
    Completed(anyhow::Result<T>),
    TimedOut(Duration),
    Panicked(Box<dyn Any + Send>),
}

/// Runs batch operations inside tracked sessions.
///
/// Every run gets its own committed session and a `SessionGuard`. Whatever
/// happens to the operation, the session ends in `ok`, `failed` or
/// `exception` and its working areas are dropped.
#[derive(Debug, Clone)]
pub struct BatchDriver {
    tracker: Tracker,
}

impl BatchDriver {
    pub fn new(tracker: Tracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Create and commit a session starting now.
    pub async fn begin(
        &self,
        kind: SessionKind,
        principal: impl Into<PrincipalRef>,
    ) -> Result<Session> {
        let mut session = Session::new(&self.tracker, kind, principal);
        session.set_start(TimeSpec::Now).await?;
        session.commit().await?;
        Ok(session)
    }

    /// Run `op` inside a fresh session.
    ///
    /// `op` receives a handle on the committed session. An `Err` from `op`
    /// finishes the session as `failed`; exceeding the configured time limit
    /// finishes it as `exception`. A panic marks the session `exception` and
    /// is then resumed on the caller. Working areas that cannot be dropped
    /// are reported in `failure`, and a run that would have been `ok`
    /// finishes as `failed`. Tracking errors are returned as-is; the guard
    /// still marks the session on the way out.
    pub async fn run<T, F, Fut>(
        &self,
        kind: SessionKind,
        principal: impl Into<PrincipalRef>,
        op: F,
    ) -> Result<BatchReport<T>>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut session = self.begin(kind, principal).await?;
        let guard = SessionGuard::arm(&session)?;
        let session_id = guard.session_id().clone();
        let span = info_span!("batch.run", session = %session_id, %kind);

        async {
            let work = AssertUnwindSafe(op(session.clone())).catch_unwind();
            let outcome = match self.tracker.config().batch_time_limit {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(Ok(result)) => Outcome::Completed(result),
                    Ok(Err(payload)) => Outcome::Panicked(payload),
                    Err(_) => Outcome::TimedOut(limit),
                },
                None => match work.await {
                    Ok(result) => Outcome::Completed(result),
                    Err(payload) => Outcome::Panicked(payload),
                },
            };

            let cleanup = match session.drop_working_areas().await {
                Ok(dropped) => {
                    if !dropped.is_empty() {
                        event!(Level::DEBUG, dropped = dropped.len(), "working areas dropped");
                    }
                    None
                }
                Err(err) => {
                    event!(Level::ERROR, error = %err, "failed to drop working areas");
                    Some(format!("working areas not dropped: {}", err))
                }
            };

            let (mut status, output, mut failure) = match outcome {
                Outcome::Completed(Ok(value)) => (Status::Ok, Some(value), None),
                Outcome::Completed(Err(err)) => {
                    let message = format!("{:#}", err);
                    event!(Level::ERROR, error = %message, "batch operation failed");
                    (Status::Failed, None, Some(message))
                }
                Outcome::TimedOut(limit) => {
                    event!(Level::ERROR, ?limit, "batch operation exceeded its time limit");
                    let message = format!("time limit of {:?} exceeded", limit);
                    (Status::Exception, None, Some(message))
                }
                Outcome::Panicked(payload) => {
                    event!(Level::ERROR, "batch operation panicked");
                    if let Err(err) = guard.finalize().await {
                        event!(Level::ERROR, error = %err, "failed to mark panicked session");
                    }
                    panic::resume_unwind(payload);
                }
            };

            // Leftover staging areas turn a clean run into a failed one.
            if let Some(cleanup) = cleanup {
                if status == Status::Ok {
                    status = Status::Failed;
                }
                failure = Some(match failure {
                    Some(message) => format!("{}; {}", message, cleanup),
                    None => cleanup,
                });
            }

            session.finish(status).await?;
            guard.disarm();
            event!(Level::INFO, %status, "batch run finished");
            Ok(BatchReport {
                session_id: session_id.clone(),
                status,
                output,
                failure,
            })
        }
        .instrument(span)
        .await
    }

    /// Mark every session without a terminal status whose start is older
    /// than `older_than` as `exception`. Returns the ids that were marked.
    pub async fn sweep_abandoned(&self, older_than: Duration) -> Result<Vec<RecordId>> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|_| TrailError::invalid("sweep age", format!("{:?}", older_than)))?;
        let cutoff = self.tracker.now().await? - age;

        let running = Status::ALL
            .iter()
            .filter(|status| !status.is_terminal())
            .map(|status| status.as_str());
        let criteria = Criteria::any_of(fields::STATUS, running);
        let candidates = self
            .tracker
            .store()
            .find_all(self.tracker.session_collection(), &criteria)
            .await?;

        let mut marked = Vec::new();
        for document in candidates {
            let record: SessionRecord = decode(document)?;
            let Some(id) = record.id else {
                continue;
            };
            if record.start < cutoff && mark_abandoned(&self.tracker, &id).await? {
                marked.push(id);
            }
        }
        if !marked.is_empty() {
            event!(Level::WARN, count = marked.len(), "swept abandoned sessions");
        }
        Ok(marked)
    }
}
