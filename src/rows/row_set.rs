// ABOUTME: Immutable tuple collection used as the currency between executors and the comparator
// ABOUTME: Supports batching, column subsetting, derived columns and lookup-table projection

use std::collections::{BTreeMap, HashMap, HashSet};

use super::value::Value;
use crate::error::{Result, SyncError};

/// One tuple, positionally aligned with [`RowSet::columns`].
pub type Row = Vec<Value>;

/// Named columns plus tuples.
///
/// Every tuple has exactly one value per column and column names are unique.
/// Row order is kept but carries no meaning for comparison. Transformations
/// return new sets; a `RowSet` is never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RowSet {
    /// Build a row set, validating column uniqueness and tuple arity.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        ensure_unique(&columns)?;
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(SyncError::ArityMismatch {
                    row: idx,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    /// A row set with the given columns and no rows.
    pub fn empty(columns: Vec<String>) -> Result<Self> {
        Self::new(columns, Vec::new())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn require_index(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| SyncError::UnknownColumn {
                column: name.to_string(),
                available: self.columns.clone(),
            })
    }

    /// Positional view.
    pub fn as_tuples(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Name-keyed view, one map per row.
    pub fn as_maps(&self) -> Vec<BTreeMap<&str, &Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(String::as_str)
                    .zip(row.iter())
                    .collect()
            })
            .collect()
    }

    /// Project onto the named columns, ordered by column name.
    ///
    /// Duplicate names are collapsed. An unknown name is a programmer error
    /// and fails immediately.
    pub fn subset<S: AsRef<str>>(&self, columns: &[S]) -> Result<RowSet> {
        let mut names: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        names.sort();
        names.dedup();
        self.select(&names)
    }

    /// Project onto the named columns, keeping the requested order.
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Result<RowSet> {
        let names: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        ensure_unique(&names)?;
        let indices = names
            .iter()
            .map(|name| self.require_index(name))
            .collect::<Result<Vec<_>>>()?;

        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(RowSet {
            columns: names,
            rows,
        })
    }

    /// Split into consecutive row sets of at most `size` rows.
    ///
    /// Calling this again starts over from the first row. A `size` of zero is
    /// treated as one.
    pub fn batches(&self, size: usize) -> impl ExactSizeIterator<Item = RowSet> + '_ {
        self.rows.chunks(size.max(1)).map(move |chunk| RowSet {
            columns: self.columns.clone(),
            rows: chunk.to_vec(),
        })
    }

    /// Union of row sets that share an identical column list.
    pub fn concat<I>(sets: I) -> Result<RowSet>
    where
        I: IntoIterator<Item = RowSet>,
    {
        let mut iter = sets.into_iter();
        let Some(mut combined) = iter.next() else {
            return Ok(RowSet::default());
        };

        for set in iter {
            if set.columns != combined.columns {
                return Err(SyncError::ColumnMismatch {
                    expected: combined.columns.clone(),
                    found: set.columns,
                });
            }
            combined.rows.extend(set.rows);
        }

        Ok(combined)
    }

    /// Append a column holding the same value on every row.
    pub fn with_static_column(&self, name: &str, value: Value) -> Result<RowSet> {
        self.with_computed_column(name, |_| value.clone())
    }

    /// Append a column computed from each row.
    pub fn with_computed_column<F>(&self, name: &str, compute: F) -> Result<RowSet>
    where
        F: Fn(&RowView<'_>) -> Value,
    {
        if self.has_column(name) {
            return Err(SyncError::DuplicateColumn {
                column: name.to_string(),
            });
        }

        let mut columns = self.columns.clone();
        columns.push(name.to_string());

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let view = RowView {
                    columns: &self.columns,
                    row,
                };
                let mut extended = row.clone();
                extended.push(compute(&view));
                extended
            })
            .collect();

        Ok(RowSet { columns, rows })
    }

    /// Build a key → value lookup over the given column sets.
    ///
    /// Both sides are reordered by column name so that two row sets whose
    /// columns arrive in different orders produce identical tuples. When a
    /// key tuple repeats, the greatest value tuple wins, which keeps the
    /// projection independent of row order.
    pub fn project_to_lookup_table<K, V>(&self, keys: &[K], values: &[V]) -> Result<LookupTable>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key_columns = canonical(keys);
        let value_columns = canonical(values);

        let key_idx = key_columns
            .iter()
            .map(|c| self.require_index(c))
            .collect::<Result<Vec<_>>>()?;
        let value_idx = value_columns
            .iter()
            .map(|c| self.require_index(c))
            .collect::<Result<Vec<_>>>()?;

        let mut entries: HashMap<Row, Row> = HashMap::with_capacity(self.rows.len());
        for row in &self.rows {
            let key: Row = key_idx.iter().map(|&i| row[i].clone()).collect();
            let value: Row = value_idx.iter().map(|&i| row[i].clone()).collect();
            match entries.get_mut(&key) {
                Some(existing) if *existing >= value => {}
                Some(existing) => *existing = value,
                None => {
                    entries.insert(key, value);
                }
            }
        }

        Ok(LookupTable {
            key_columns,
            value_columns,
            entries,
        })
    }

    /// Rows of `self` whose key tuple appears in `key_rows`.
    ///
    /// `key_rows` must carry every column in `keys`; extra columns are ignored.
    pub fn retain_keys<S: AsRef<str>>(&self, keys: &[S], key_rows: &RowSet) -> Result<RowSet> {
        let own_idx = keys
            .iter()
            .map(|k| self.require_index(k.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let wanted_idx = keys
            .iter()
            .map(|k| key_rows.require_index(k.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let wanted: HashSet<Row> = key_rows
            .rows
            .iter()
            .map(|row| wanted_idx.iter().map(|&i| row[i].clone()).collect())
            .collect();

        let rows = self
            .rows
            .iter()
            .filter(|row| {
                let key: Row = own_idx.iter().map(|&i| row[i].clone()).collect();
                wanted.contains(&key)
            })
            .cloned()
            .collect();

        Ok(RowSet {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Sort rows by the named columns (then by the remaining values).
    pub fn sorted_by<S: AsRef<str>>(&self, columns: &[S]) -> Result<RowSet> {
        let idx = columns
            .iter()
            .map(|c| self.require_index(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            idx.iter()
                .map(|&i| a[i].cmp(&b[i]))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.cmp(b))
        });

        Ok(RowSet {
            columns: self.columns.clone(),
            rows,
        })
    }
}

/// Borrowed view of one row, used by computed columns.
pub struct RowView<'a> {
    columns: &'a [String],
    row: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.row[i])
    }
}

/// Ephemeral key tuple → value tuple map built for comparison.
#[derive(Debug, Clone)]
pub struct LookupTable {
    key_columns: Vec<String>,
    value_columns: Vec<String>,
    entries: HashMap<Row, Row>,
}

impl LookupTable {
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn value_columns(&self) -> &[String] {
        &self.value_columns
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[Value]) -> Option<&Row> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &[Value]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Row, &Row)> {
        self.entries.iter()
    }
}

fn canonical<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    let mut names: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
    names.sort();
    names.dedup();
    names
}

fn ensure_unique(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(SyncError::DuplicateColumn {
                column: column.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> RowSet {
        RowSet::new(
            vec!["name".to_string(), "id".to_string(), "age".to_string()],
            vec![
                vec![Value::from("ann"), Value::Int(1), Value::Int(30)],
                vec![Value::from("bob"), Value::Int(2), Value::Int(41)],
                vec![Value::from("cid"), Value::Int(3), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_arity() {
        let err = RowSet::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![Value::Int(1)]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::ArityMismatch {
                row: 0,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        let err = RowSet::empty(vec!["a".to_string(), "a".to_string()]).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_subset_sorts_by_name() {
        let subset = people().subset(&["name", "id"]).unwrap();
        assert_eq!(subset.columns(), &["id".to_string(), "name".to_string()]);
        assert_eq!(subset.as_tuples()[1], vec![Value::Int(2), Value::from("bob")]);
    }

    #[test]
    fn test_subset_unknown_column_fails_fast() {
        let err = people().subset(&["id", "missing"]).unwrap_err();
        match err {
            SyncError::UnknownColumn { column, available } => {
                assert_eq!(column, "missing");
                assert_eq!(available.len(), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_select_keeps_requested_order() {
        let selected = people().select(&["age", "id"]).unwrap();
        assert_eq!(selected.columns(), &["age".to_string(), "id".to_string()]);
        assert_eq!(selected.as_tuples()[0], vec![Value::Int(30), Value::Int(1)]);
    }

    #[test]
    fn test_batches_round_trip() {
        let rows: Vec<Row> = (0..23).map(|i| vec![Value::Int(i)]).collect();
        let set = RowSet::new(vec!["id".to_string()], rows).unwrap();

        for size in [1, 2, 5, 22, 23, 24, 100] {
            let batches: Vec<RowSet> = set.batches(size).collect();
            assert!(batches.iter().all(|b| b.len() <= size));
            assert_eq!(RowSet::concat(batches).unwrap(), set);
        }
    }

    #[test]
    fn test_batches_are_restartable() {
        let set = people();
        assert_eq!(set.batches(2).len(), 2);
        assert_eq!(set.batches(2).len(), 2);
        assert_eq!(set.batches(0).len(), 3);
    }

    #[test]
    fn test_batches_of_empty_set() {
        let set = RowSet::empty(vec!["id".to_string()]).unwrap();
        assert_eq!(set.batches(10).count(), 0);
    }

    #[test]
    fn test_concat_rejects_mismatched_columns() {
        let a = RowSet::empty(vec!["id".to_string()]).unwrap();
        let b = RowSet::empty(vec!["key".to_string()]).unwrap();
        assert!(matches!(
            RowSet::concat(vec![a, b]),
            Err(SyncError::ColumnMismatch { .. })
        ));
    }

    #[test]
    fn test_concat_of_nothing_is_empty() {
        let set = RowSet::concat(Vec::new()).unwrap();
        assert!(set.is_empty());
        assert!(set.columns().is_empty());
    }

    #[test]
    fn test_static_and_computed_columns() {
        let set = people()
            .with_static_column("source", Value::from("crm"))
            .unwrap()
            .with_computed_column("id_plus_one", |row| match row.get("id") {
                Some(Value::Int(i)) => Value::Int(i + 1),
                _ => Value::Null,
            })
            .unwrap();

        assert_eq!(set.columns().len(), 5);
        let maps = set.as_maps();
        assert_eq!(maps[2]["source"], &Value::from("crm"));
        assert_eq!(maps[2]["id_plus_one"], &Value::Int(4));

        assert!(matches!(
            set.with_static_column("id", Value::Null),
            Err(SyncError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_lookup_table_is_independent_of_column_order() {
        let a = people();
        let b = people().select(&["age", "id", "name"]).unwrap();

        let la = a.project_to_lookup_table(&["id"], &["name", "age"]).unwrap();
        let lb = b.project_to_lookup_table(&["id"], &["age", "name"]).unwrap();

        assert_eq!(la.value_columns(), &["age".to_string(), "name".to_string()]);
        for (key, value) in la.iter() {
            assert_eq!(lb.get(key), Some(value));
        }
        assert_eq!(la.len(), lb.len());
    }

    #[test]
    fn test_lookup_table_duplicate_keys_are_order_independent() {
        let forward = RowSet::new(
            vec!["id".to_string(), "v".to_string()],
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(1), Value::from("z")],
            ],
        )
        .unwrap();
        let backward = RowSet::new(
            vec!["id".to_string(), "v".to_string()],
            vec![
                vec![Value::Int(1), Value::from("z")],
                vec![Value::Int(1), Value::from("a")],
            ],
        )
        .unwrap();

        let lf = forward.project_to_lookup_table(&["id"], &["v"]).unwrap();
        let lb = backward.project_to_lookup_table(&["id"], &["v"]).unwrap();
        assert_eq!(lf.get(&[Value::Int(1)]), lb.get(&[Value::Int(1)]));
        assert_eq!(lf.len(), 1);
    }

    #[test]
    fn test_retain_keys() {
        let keys = RowSet::new(
            vec!["id".to_string()],
            vec![vec![Value::Int(3)], vec![Value::Int(1)], vec![Value::Int(9)]],
        )
        .unwrap();

        let kept = people().retain_keys(&["id"], &keys).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.columns(), people().columns());
    }

    #[test]
    fn test_sorted_by() {
        let sorted = people().sorted_by(&["age"]).unwrap();
        let ids: Vec<&Value> = sorted.as_tuples().iter().map(|r| &r[1]).collect();
        assert_eq!(ids, vec![&Value::Int(3), &Value::Int(1), &Value::Int(2)]);
    }
}
