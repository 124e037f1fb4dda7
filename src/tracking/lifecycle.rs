use super::Tracker;
use super::fields;
use super::mode::Mode;
use super::record::to_value;
use crate::core::{Counter, Counters, Result, Status, TimeSpec, Timestamp, TrailError};
use crate::store::FieldPatch;

/// Start, end, status and counters shared by sessions and transactions.
///
/// Each setter writes through the object's `Mode` first and updates the
/// local copy only after the store accepted the change.
#[derive(Debug, Clone, PartialEq)]
pub struct Lifecycle {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub status: Status,
    pub counters: Counters,
}

impl Lifecycle {
    pub fn begin(start: Timestamp) -> Self {
        Self {
            start,
            end: None,
            status: Status::Executing,
            counters: Counters::default(),
        }
    }

    pub(crate) async fn set_start(
        &mut self,
        tracker: &Tracker,
        mode: &Mode,
        time: TimeSpec,
    ) -> Result<Timestamp> {
        let start = tracker.resolve(time).await?;
        if let Some(record) = mode.record() {
            record.set(fields::START, to_value(&start)?).await?;
        }
        self.start = start;
        Ok(start)
    }

    pub(crate) async fn set_end(
        &mut self,
        tracker: &Tracker,
        mode: &Mode,
        time: TimeSpec,
    ) -> Result<Timestamp> {
        let end = tracker.resolve(time).await?;
        if let Some(record) = mode.record() {
            record.set(fields::END, to_value(&end)?).await?;
        }
        self.end = Some(end);
        Ok(end)
    }

    pub(crate) async fn set_status(&mut self, mode: &Mode, status: Status) -> Result<()> {
        if let Some(record) = mode.record() {
            record.set(fields::STATUS, to_value(&status)?).await?;
        }
        self.status = status;
        Ok(())
    }

    /// Status plus `end = now`.
    pub(crate) async fn finish(
        &mut self,
        tracker: &Tracker,
        mode: &Mode,
        status: Status,
    ) -> Result<Timestamp> {
        self.finish_at(tracker, mode, status, TimeSpec::Now).await
    }

    /// Status and `end` go to the store in a single patch, so a rejected
    /// write leaves both the record and the local copy untouched.
    pub(crate) async fn finish_at(
        &mut self,
        tracker: &Tracker,
        mode: &Mode,
        status: Status,
        time: TimeSpec,
    ) -> Result<Timestamp> {
        let end = tracker.resolve(time).await?;
        if let Some(record) = mode.record() {
            let patch = FieldPatch::new()
                .set(fields::STATUS, to_value(&status)?)
                .set(fields::END, to_value(&end)?);
            record.patch(patch).await?;
        }
        self.status = status;
        self.end = Some(end);
        Ok(end)
    }

    /// Returns the post-increment value. Under concurrent writers the local
    /// copy is only as fresh as the last operation made through this handle.
    pub(crate) async fn increment(
        &mut self,
        mode: &Mode,
        counter: Counter,
        delta: i64,
    ) -> Result<u64> {
        let next = match mode.record() {
            Some(record) => record.increment(counter.field(), delta).await?,
            None => i64::try_from(self.counters.get(counter))
                .ok()
                .and_then(|current| current.checked_add(delta))
                .ok_or_else(|| TrailError::invalid("counter delta", delta.to_string()))?,
        };
        let next = u64::try_from(next)
            .map_err(|_| TrailError::invalid("counter value", next.to_string()))?;
        self.counters.set(counter, next);
        Ok(next)
    }
}
