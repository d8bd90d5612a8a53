// ABOUTME: Row model shared by executors, repositories and the comparator
// ABOUTME: Exposes the cell value type and the immutable row set

pub mod row_set;
pub mod value;

pub use row_set::{LookupTable, Row, RowSet, RowView};
pub use value::{parse_datetime, Value, DATETIME_FORMAT, DATE_FORMAT};
