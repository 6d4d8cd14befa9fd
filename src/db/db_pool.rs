use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::Mutex;

use super::DbError;

/// Pools connections to a single DuckDB database instance.
///
/// DuckDB holds an exclusive lock on a database file per instance, so every
/// pooled connection is cloned from one root connection instead of reopening
/// the file.
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Result<Self, DbError> {
        let root = if connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&connection_string)?
        };

        Ok(Self {
            root: Mutex::new(root),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = DbError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self
            .root
            .lock()
            .map_err(|_| DbError::Manager("root connection lock poisoned".to_string()))?;
        Ok(root.try_clone()?)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
