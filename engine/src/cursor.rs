//! Per-query pull cursors.

use crate::{ChangeMarker, CollectionName, QueryName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How far an incremental pull has progressed for one named query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCursor {
    pub collection: CollectionName,
    pub query: QueryName,
    pub marker: ChangeMarker,
}

/// Cursors of every query, keyed by collection and query name.
///
/// Markers only move forward; an older marker is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursors {
    markers: BTreeMap<(CollectionName, QueryName), ChangeMarker>,
}

impl Cursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current marker; zero for a query never pulled.
    pub fn get(&self, collection: &str, query: &str) -> ChangeMarker {
        self.markers
            .get(&(collection.to_string(), query.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Move a cursor forward. Returns whether it moved.
    pub fn advance(&mut self, collection: &str, query: &str, marker: ChangeMarker) -> bool {
        let current = self
            .markers
            .entry((collection.to_string(), query.to_string()))
            .or_insert(0);
        if marker > *current {
            *current = marker;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = QueryCursor> + '_ {
        self.markers
            .iter()
            .map(|((collection, query), marker)| QueryCursor {
                collection: collection.clone(),
                query: query.clone(),
                marker: *marker,
            })
    }
}

impl FromIterator<QueryCursor> for Cursors {
    fn from_iter<I: IntoIterator<Item = QueryCursor>>(iter: I) -> Self {
        let mut cursors = Cursors::new();
        for cursor in iter {
            cursors.advance(&cursor.collection, &cursor.query, cursor.marker);
        }
        cursors
    }
}
