// ABOUTME: `table-sync inspect` - prints an introspected table schema as JSON
// ABOUTME: Always reads live metadata; the schema cache is bypassed

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::config::FileConfig;
use crate::connection::Connection;
use crate::schema::{TableRef, TableSchema};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Side {
    #[default]
    Source,
    Destination,
}

#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub allow_self_signed_certs: bool,
    pub side: Side,
    pub table: String,
    pub primary_key: Option<Vec<String>>,
}

pub async fn inspect(config: &FileConfig, options: &InspectOptions) -> Result<TableSchema> {
    let url = match options.side {
        Side::Source => &config.source.url,
        Side::Destination => &config.destination.url,
    };
    let table: TableRef = options.table.parse()?;

    let connection = Connection::open(url, options.allow_self_signed_certs).await?;
    let schema = connection
        .introspector()
        .inspect(&table, options.primary_key.as_deref(), None)
        .await
        .with_context(|| format!("Failed to inspect {} on {}", table, connection.scope()))?;

    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    println!("{}", json);
    Ok(schema)
}
