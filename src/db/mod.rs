pub mod db_pool;
pub mod db_utils;
pub mod duckdb_database;
pub mod schema_manager;

use crate::catalog::TableRef;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// One result row; keys keep the column order of the result set
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Statement timed out after {0} seconds")]
    Timeout(u64),
    #[error("Database task failed: {0}")]
    Task(String),
    #[error("Connection manager error: {0}")]
    Manager(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Structured description of one table, as handed to the SQL prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnSchema>,
}

/// What the pipeline needs from the database: run a statement, and introspect columns.
#[async_trait]
pub trait Database: Send + Sync {
    async fn execute_sql(&self, statement: &str, timeout: Duration) -> Result<Vec<Row>, DbError>;

    async fn column_names(&self, table: &TableRef) -> Result<Vec<String>, DbError>;

    async fn reflect_schema(&self, tables: &[TableRef]) -> Result<Vec<TableSchema>, DbError>;
}
