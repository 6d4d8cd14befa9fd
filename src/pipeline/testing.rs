//! Hand-written capability doubles shared by the pipeline tests.

use crate::catalog::{SchemaCatalog, SchemaDescriptor, TableRef};
use crate::db::{ColumnSchema, Database, DbError, Row, TableSchema};
use crate::llm::{ChatCompletion, ChatMessage, Embedder, LlmError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type ChatFn = dyn Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync;

/// Chat double that answers through a closure and records every request
pub struct ScriptedChat {
    responder: Box<ChatFn>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(
        responder: impl Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn sequence(replies: Vec<Result<String, LlmError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::ResponseError("script exhausted".to_string())))
        })
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        (self.responder)(messages)
    }
}

/// Bag-of-keywords embedder: one dimension per vocabulary word, counting occurrences
pub struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: Vec<&'static str>) -> Self {
        Self {
            vocabulary,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        Ok(self
            .vocabulary
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect())
    }

    fn model(&self) -> &str {
        "keyword-test"
    }
}

/// Embedder whose every call fails
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::ConnectionError("embedding service down".to_string()))
    }

    fn model(&self) -> &str {
        "failing"
    }
}

type ExecFn = dyn Fn(&str) -> Result<Vec<Row>, DbError> + Send + Sync;

/// Database double with declared columns and a scripted executor
pub struct ScriptedDatabase {
    columns: HashMap<TableRef, Vec<String>>,
    executor: Box<ExecFn>,
    statements: Mutex<Vec<String>>,
}

impl ScriptedDatabase {
    pub fn new(
        columns: Vec<(TableRef, Vec<&str>)>,
        executor: impl Fn(&str) -> Result<Vec<Row>, DbError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(table, cols)| (table, cols.into_iter().map(str::to_string).collect()))
                .collect(),
            executor: Box::new(executor),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for ScriptedDatabase {
    async fn execute_sql(&self, statement: &str, _timeout: Duration) -> Result<Vec<Row>, DbError> {
        self.statements.lock().unwrap().push(statement.to_string());
        (self.executor)(statement)
    }

    async fn column_names(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }

    async fn reflect_schema(&self, tables: &[TableRef]) -> Result<Vec<TableSchema>, DbError> {
        Ok(tables
            .iter()
            .map(|table| TableSchema {
                schema: table.schema.clone(),
                table: table.table.clone(),
                columns: self
                    .columns
                    .get(table)
                    .into_iter()
                    .flatten()
                    .map(|name| ColumnSchema {
                        name: name.clone(),
                        data_type: "VARCHAR".to_string(),
                        nullable: true,
                    })
                    .collect(),
            })
            .collect())
    }
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn drivers() -> TableRef {
    TableRef::new("f1", "Drivers")
}

pub fn constructor_championships() -> TableRef {
    TableRef::new("f1", "ConstructorChampionships")
}

/// Two-table Formula 1 catalog
pub fn f1_catalog() -> SchemaCatalog {
    SchemaCatalog {
        description: "Formula 1 statistics".to_string(),
        schemas: vec![SchemaDescriptor {
            name: "f1".to_string(),
            description: Some("Race results by season".to_string()),
            tables: vec!["Drivers".to_string(), "ConstructorChampionships".to_string()],
        }],
    }
}

pub fn f1_columns() -> Vec<(TableRef, Vec<&'static str>)> {
    vec![
        (drivers(), vec!["driver_name", "season", "points", "wins"]),
        (constructor_championships(), vec!["constructor", "season", "titles"]),
    ]
}

/// Vocabulary that separates the two F1 tables
pub fn f1_vocabulary() -> Vec<&'static str> {
    vec!["driver", "verstappen", "points", "constructor", "team", "title"]
}
