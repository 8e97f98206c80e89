//! Cross-window deduplication and local id assignment.

use std::collections::HashSet;

use tracing::warn;

use crate::{EntityId, LocalId, ResultRecord};

/// Collects accepted records in first-seen order, one per entity.
///
/// Ids are assigned only when records are emitted, so the same sequence of
/// pushes always yields the same numbering.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    seen: HashSet<EntityId>,
    entries: Vec<ResultRecord>,
    duplicates: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the records of an existing result file.
    ///
    /// Existing records keep their position, `checked` and `note`. Their
    /// identity is recovered from the URL; a record whose URL cannot be parsed
    /// is kept but does not take part in deduplication.
    pub fn seeded(existing: Vec<ResultRecord>) -> Self {
        let mut aggregator = Self::new();
        for record in existing {
            match EntityId::from_html_url(&record.url) {
                Some(entity) => {
                    aggregator.push(entity, record);
                }
                None => {
                    warn!(url = %record.url, "existing record has an unrecognised URL; kept as is");
                    aggregator.entries.push(record);
                }
            }
        }
        aggregator.duplicates = 0;
        aggregator
    }

    /// Adds a record unless its entity was already seen. Returns `true` when
    /// the record was added.
    pub fn push(&mut self, entity: EntityId, record: ResultRecord) -> bool {
        if !self.seen.insert(entity) {
            self.duplicates += 1;
            return false;
        }
        self.entries.push(record);
        true
    }

    /// Returns `true` if `entity` is already present.
    pub fn contains(&self, entity: &EntityId) -> bool {
        self.seen.contains(entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pushes rejected because their entity was already present.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Emits every record with dense ids `1..=len`.
    pub fn records(&self) -> Vec<ResultRecord> {
        self.entries
            .iter()
            .zip(1u64..)
            .map(|(record, id)| ResultRecord {
                id: LocalId::new(id),
                ..record.clone()
            })
            .collect()
    }
}
