use crate::core::{Document, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ID_FIELD;

/// A single match condition on a top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl Clause {
    fn matches(&self, document: &Document) -> bool {
        match self {
            Clause::Eq { field, value } => document.get(field) == Some(value),
            Clause::In { field, values } => document
                .get(field)
                .is_some_and(|actual| values.contains(actual)),
        }
    }
}

/// Conjunction of clauses. An empty criteria matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    clauses: Vec<Clause>,
}

impl Criteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::all().and_in(field, values)
    }

    pub fn by_id(id: &RecordId) -> Self {
        Self::eq(ID_FIELD, id.as_str())
    }

    pub fn by_ids<'a>(ids: impl IntoIterator<Item = &'a RecordId>) -> Self {
        Self::any_of(ID_FIELD, ids.into_iter().map(|id| id.as_str().to_string()))
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn and_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.clauses.push(Clause::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|clause| clause.matches(document))
    }
}
