// ABOUTME: Per-dialect rendering of values as inline SQL literals
// ABOUTME: Used for primary-key predicates, which are built in-process rather than bound

use super::quote::{quote_hive_literal, quote_literal};
use super::Dialect;
use crate::error::{Result, SyncError};
use crate::rows::{Value, DATETIME_FORMAT, DATE_FORMAT};
use crate::schema::DataType;

/// Significant digits kept when a float is rendered inline (round-trip exact).
const FLOAT_DIGITS: usize = 16;

pub(super) fn render(dialect: Dialect, value: &Value, data_type: Option<DataType>) -> Result<String> {
    let scale = match data_type {
        Some(DataType::Decimal { scale, .. }) => Some(scale as usize),
        _ => None,
    };

    let literal = match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => render_bool(dialect, *b),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(SyncError::UnsupportedLiteral {
                    dialect: dialect.name(),
                    value: f.to_string(),
                });
            }
            match scale {
                Some(scale) => format!("{:.*}", scale, f),
                None => format!("{:.*e}", FLOAT_DIGITS, f),
            }
        }
        Value::Decimal(d) => match scale {
            Some(scale) => format!("{:.*}", scale, d),
            None => d.to_string(),
        },
        Value::Text(s) => render_text(dialect, s),
        Value::Date(d) => {
            let text = d.format(DATE_FORMAT).to_string();
            match dialect {
                Dialect::Postgres | Dialect::Hive => format!("DATE {}", quote_literal(&text)),
                Dialect::SqlServer => format!("CAST({} AS DATE)", quote_literal(&text)),
                Dialect::Sqlite => quote_literal(&text),
            }
        }
        Value::DateTime(dt) => {
            let text = dt.format(DATETIME_FORMAT).to_string();
            match dialect {
                Dialect::Postgres | Dialect::Hive => {
                    format!("TIMESTAMP {}", quote_literal(&text))
                }
                Dialect::SqlServer => format!("CAST({} AS DATETIME2)", quote_literal(&text)),
                Dialect::Sqlite => quote_literal(&text),
            }
        }
    };

    Ok(literal)
}

fn render_bool(dialect: Dialect, value: bool) -> String {
    match dialect {
        Dialect::Postgres | Dialect::Hive => {
            if value {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Dialect::SqlServer | Dialect::Sqlite => {
            if value {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
    }
}

fn render_text(dialect: Dialect, value: &str) -> String {
    match dialect {
        Dialect::Postgres | Dialect::Sqlite => quote_literal(value),
        Dialect::SqlServer => format!("N{}", quote_literal(value)),
        Dialect::Hive => quote_hive_literal(value),
    }
}
