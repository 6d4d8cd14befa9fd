use crate::catalog::TableRef;
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::db_utils::query_rows;
use crate::db::schema_manager::SchemaManager;
use crate::db::{Database, DbError, Row, TableSchema};
use async_trait::async_trait;
use r2d2::Pool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// `Database` backed by a pooled DuckDB file
pub struct DuckDbDatabase {
    pool: Pool<DuckDBConnectionManager>,
    schema_manager: Arc<SchemaManager>,
}

impl DuckDbDatabase {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        let schema_manager = Arc::new(SchemaManager::new(pool.clone()));
        Self {
            pool,
            schema_manager,
        }
    }

    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schema_manager
    }
}

#[async_trait]
impl Database for DuckDbDatabase {
    async fn execute_sql(&self, statement: &str, timeout: Duration) -> Result<Vec<Row>, DbError> {
        debug!("Executing SQL: {}", statement);

        let pool = self.pool.clone();
        let sql = statement.to_string();
        let task = tokio::task::spawn_blocking(move || -> Result<Vec<Row>, DbError> {
            let start_time = Instant::now();
            let conn = pool.get()?;
            let rows = query_rows(&conn, &sql)?;
            info!(
                "Query returned {} rows in {}ms",
                rows.len(),
                start_time.elapsed().as_millis()
            );
            Ok(rows)
        });

        // The blocking task keeps running after a timeout; only the caller stops waiting
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(|e| DbError::Task(e.to_string()))?,
            Err(_) => Err(DbError::Timeout(timeout.as_secs())),
        }
    }

    async fn column_names(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        let columns = self.schema_manager.columns(table).await?;
        Ok(columns.into_iter().map(|c| c.name).collect())
    }

    async fn reflect_schema(&self, tables: &[TableRef]) -> Result<Vec<TableSchema>, DbError> {
        let mut reflected = Vec::with_capacity(tables.len());
        for table in tables {
            let columns = self.schema_manager.columns(table).await?;
            reflected.push(TableSchema {
                schema: table.schema.clone(),
                table: table.table.clone(),
                columns,
            });
        }
        Ok(reflected)
    }
}
