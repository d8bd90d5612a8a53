// ABOUTME: Three-way row diff (added / deleted / updated) keyed by primary-key columns
// ABOUTME: Pure and deterministic; works on projections, never on whole tables

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::rows::{LookupTable, Row, RowSet};

/// What to do when a requested key or compare column is missing from one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyColumnPolicy {
    /// Any missing column is an error.
    Strict,
    /// Silently use the columns present on both sides.
    #[default]
    Lenient,
}

/// Result of comparing two row sets.
///
/// Each set carries the usable key columns followed by the usable compare
/// columns (both sorted by name), with rows sorted by key. `added` and
/// `updated` hold source values; `deleted` holds destination values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDiff {
    pub added: RowSet,
    pub deleted: RowSet,
    pub updated: RowSet,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RowComparator {
    key_policy: KeyColumnPolicy,
}

impl RowComparator {
    pub fn new(key_policy: KeyColumnPolicy) -> Self {
        Self { key_policy }
    }

    /// Diff `source` against `destination`.
    ///
    /// Every key present on either side lands in exactly one of `added`,
    /// `deleted`, `updated` or unchanged. Values are compared with exact
    /// structural equality.
    pub fn compare(
        &self,
        key_columns: &[String],
        compare_columns: &[String],
        source: &RowSet,
        destination: &RowSet,
    ) -> Result<RowDiff> {
        let keys = self.usable_columns("key", key_columns, source, destination)?;
        if keys.is_empty() {
            return Err(SyncError::NoCommonKeyColumns {
                requested: key_columns.to_vec(),
                source_columns: source.columns().to_vec(),
                destination_columns: destination.columns().to_vec(),
            });
        }

        let requested_compare: Vec<String> = compare_columns
            .iter()
            .filter(|c| !keys.contains(c))
            .cloned()
            .collect();
        let values = self.usable_columns("compare", &requested_compare, source, destination)?;
        if values.is_empty() {
            tracing::warn!(
                "No usable compare columns (requested: [{}]); updates cannot be detected",
                compare_columns.join(", ")
            );
        }

        let source_lookup = source.project_to_lookup_table(&keys, &values)?;
        let destination_lookup = destination.project_to_lookup_table(&keys, &values)?;

        let columns: Vec<String> = source_lookup
            .key_columns()
            .iter()
            .chain(source_lookup.value_columns())
            .cloned()
            .collect();

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (key, value) in source_lookup.iter() {
            match destination_lookup.get(key) {
                None => added.push(joined(key, value)),
                Some(existing) if existing != value => updated.push(joined(key, value)),
                Some(_) => {}
            }
        }
        let deleted = missing_from(&destination_lookup, &source_lookup);

        let diff = RowDiff {
            added: sorted(columns.clone(), added)?,
            deleted: sorted(columns.clone(), deleted)?,
            updated: sorted(columns, updated)?,
        };

        tracing::debug!(
            "Compared {} source rows with {} destination rows: {} added, {} deleted, {} updated",
            source.len(),
            destination.len(),
            diff.added.len(),
            diff.deleted.len(),
            diff.updated.len()
        );

        Ok(diff)
    }

    fn usable_columns(
        &self,
        kind: &'static str,
        requested: &[String],
        source: &RowSet,
        destination: &RowSet,
    ) -> Result<Vec<String>> {
        if self.key_policy == KeyColumnPolicy::Strict {
            for (side, rows) in [("source", source), ("destination", destination)] {
                let missing: Vec<String> = requested
                    .iter()
                    .filter(|c| !rows.has_column(c))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(SyncError::MissingComparisonColumns {
                        kind,
                        side,
                        columns: missing,
                    });
                }
            }
        }

        let mut usable: Vec<String> = requested
            .iter()
            .filter(|c| source.has_column(c) && destination.has_column(c))
            .cloned()
            .collect();
        usable.sort();
        usable.dedup();
        Ok(usable)
    }
}

fn joined(key: &Row, value: &Row) -> Row {
    key.iter().chain(value.iter()).cloned().collect()
}

fn missing_from(from: &LookupTable, other: &LookupTable) -> Vec<Row> {
    from.iter()
        .filter(|(key, _)| !other.contains_key(key))
        .map(|(key, value)| joined(key, value))
        .collect()
}

fn sorted(columns: Vec<String>, mut rows: Vec<Row>) -> Result<RowSet> {
    // Keys lead each row and are unique, so a full-row sort orders by key.
    rows.sort();
    RowSet::new(columns, rows)
}
