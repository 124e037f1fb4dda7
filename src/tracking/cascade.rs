use super::Tracker;
use super::fields;
use crate::core::{RecordId, Result};
use crate::store::{Criteria, document_id};
use async_recursion::async_recursion;
use std::collections::HashSet;

/// What a cascading delete removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub sessions_deleted: u64,
    pub transactions_deleted: u64,
    pub working_areas_dropped: Vec<String>,
}

/// Ids of the transactions whose `owner_field` equals `owner`.
async fn owned_by(tracker: &Tracker, owner_field: &str, owner: &RecordId) -> Result<Vec<RecordId>> {
    let criteria = Criteria::eq(owner_field, owner.as_str());
    let records = tracker
        .store()
        .find_all(tracker.transaction_collection(), &criteria)
        .await?;
    Ok(records.iter().filter_map(document_id).collect())
}

#[async_recursion]
async fn collect_below(
    tracker: &Tracker,
    parent: &RecordId,
    seen: &mut HashSet<RecordId>,
    out: &mut Vec<RecordId>,
) -> Result<()> {
    for child in owned_by(tracker, fields::PARENT, parent).await? {
        if seen.insert(child.clone()) {
            out.push(child.clone());
            collect_below(tracker, &child, seen, out).await?;
        }
    }
    Ok(())
}

/// Every transaction under a session, at any depth, parents before children.
pub async fn session_descendants(tracker: &Tracker, session: &RecordId) -> Result<Vec<RecordId>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for direct in owned_by(tracker, fields::SESSION, session).await? {
        if seen.insert(direct.clone()) {
            out.push(direct.clone());
            collect_below(tracker, &direct, &mut seen, &mut out).await?;
        }
    }
    Ok(out)
}

/// Every transaction below `root`, excluding `root` itself.
pub async fn transaction_descendants(tracker: &Tracker, root: &RecordId) -> Result<Vec<RecordId>> {
    let mut seen = HashSet::from([root.clone()]);
    let mut out = Vec::new();
    collect_below(tracker, root, &mut seen, &mut out).await?;
    Ok(out)
}

/// Delete the given transaction records in one store call.
pub async fn delete_transactions(tracker: &Tracker, ids: &[RecordId]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    tracker
        .store()
        .delete(tracker.transaction_collection(), &Criteria::by_ids(ids))
        .await
}
