use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema-qualified table identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// One declared schema and the tables the assistant may query in it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub tables: Vec<String>,
}

/// The static description of everything the pipeline is allowed to see.
///
/// Table order is significant: it is the declaration order used to break
/// similarity ties during table selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    // Free-text domain description, e.g. "Formula 1 race statistics"
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schemas: Vec<SchemaDescriptor>,
}

impl SchemaCatalog {
    pub fn tables(&self) -> Vec<TableRef> {
        self.schemas
            .iter()
            .flat_map(|schema| {
                schema
                    .tables
                    .iter()
                    .map(move |table| TableRef::new(&schema.name, table))
            })
            .collect()
    }

    pub fn contains(&self, table: &TableRef) -> bool {
        self.descriptor(&table.schema)
            .map(|schema| schema.tables.iter().any(|t| t == &table.table))
            .unwrap_or(false)
    }

    pub fn descriptor(&self, schema: &str) -> Option<&SchemaDescriptor> {
        self.schemas.iter().find(|s| s.name == schema)
    }

    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }
}
