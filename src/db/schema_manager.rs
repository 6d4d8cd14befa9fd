use crate::catalog::TableRef;
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::db_utils::query_columns;
use crate::db::{ColumnSchema, DbError};
use r2d2::Pool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A struct to cache and manage column metadata for the declared tables
pub struct SchemaManager {
    pool: Pool<DuckDBConnectionManager>,
    /// Columns per table; a missing table caches as an empty list
    schema_cache: RwLock<HashMap<TableRef, Vec<ColumnSchema>>>,
    /// Last refresh timestamp
    last_refresh: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

impl SchemaManager {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self {
            pool,
            schema_cache: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        }
    }

    /// Reload the columns of every given table. Returns the tables that do not
    /// exist in the database.
    pub async fn refresh_cache(&self, tables: &[TableRef]) -> Result<Vec<TableRef>, DbError> {
        info!("Refreshing schema cache for {} tables", tables.len());

        let pool = self.pool.clone();
        let wanted = tables.to_vec();
        let loaded = tokio::task::spawn_blocking(
            move || -> Result<HashMap<TableRef, Vec<ColumnSchema>>, DbError> {
                let conn = pool.get()?;
                let mut schema_map = HashMap::new();
                for table in wanted {
                    let columns = query_columns(&conn, &table.schema, &table.table)?;
                    debug!("Found {} columns in {}", columns.len(), table);
                    schema_map.insert(table, columns);
                }
                Ok(schema_map)
            },
        )
        .await
        .map_err(|e| DbError::Task(e.to_string()))??;

        let missing: Vec<TableRef> = tables
            .iter()
            .filter(|table| loaded.get(*table).map(Vec::is_empty).unwrap_or(true))
            .cloned()
            .collect();

        for table in &missing {
            warn!("Declared table {} was not found in the database", table);
        }

        // Update the cache
        let mut cache = self.schema_cache.write().await;
        *cache = loaded;

        // Update the last refresh timestamp
        let mut timestamp = self.last_refresh.write().await;
        *timestamp = Some(chrono::Utc::now());

        info!("Schema cache refreshed successfully");
        Ok(missing)
    }

    /// Columns of one table, loading and caching them on a miss
    pub async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnSchema>, DbError> {
        if let Some(columns) = self.schema_cache.read().await.get(table) {
            if !columns.is_empty() {
                return Ok(columns.clone());
            }
        }

        let pool = self.pool.clone();
        let lookup = table.clone();
        let columns = tokio::task::spawn_blocking(move || -> Result<Vec<ColumnSchema>, DbError> {
            let conn = pool.get()?;
            Ok(query_columns(&conn, &lookup.schema, &lookup.table)?)
        })
        .await
        .map_err(|e| DbError::Task(e.to_string()))??;

        if !columns.is_empty() {
            self.schema_cache
                .write()
                .await
                .insert(table.clone(), columns.clone());
        }

        Ok(columns)
    }

    pub async fn last_refresh(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        *self.last_refresh.read().await
    }
}
