pub mod conversation;
pub mod execution_loop;
pub mod intent;
pub mod rewrite;
pub mod selector;
pub mod sql_generator;
pub mod sql_guard;
pub mod summarize;

#[cfg(test)]
pub(crate) mod testing;

use crate::catalog::{SchemaCatalog, TableRef};
use crate::config::PipelineSettings;
use crate::db::{Database, DbError, Row};
use crate::llm::{ChatCompletion, Embedder, LlmError};
use conversation::ConversationHistory;
use execution_loop::{AttemptRecord, QueryExecutionLoop};
use intent::IntentClassifier;
use rewrite::QueryRewriter;
use selector::{TableScore, TableSelector};
use serde::Serialize;
use serde_json::json;
use sql_generator::SqlGenerator;
use std::sync::Arc;
use std::time::Duration;
use summarize::{ConversationalResponder, ResultSummarizer};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("The query is empty")]
    EmptyQuery,
    #[error("Intent classification failed: {0}")]
    Classification(LlmError),
    #[error("Query rewriting failed: {0}")]
    Rewrite(LlmError),
    #[error("Schema reflection failed: {0}")]
    Schema(DbError),
    /// Displays the last underlying error as is
    #[error("{last_error}")]
    ExhaustedRetries {
        attempts: Vec<AttemptRecord>,
        last_sql: Option<String>,
        last_error: String,
    },
    #[error("Conversational reply failed: {0}")]
    Conversation(LlmError),
    #[error("Summarization failed: {0}")]
    Summarization(LlmError),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticalAnswer {
    pub rewritten_query: String,
    pub tables: Vec<TableRef>,
    pub table_scores: Vec<TableScore>,
    pub sql: String,
    pub attempts: Vec<AttemptRecord>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Reply {
    Conversational {
        message: String,
    },
    Statistical {
        message: String,
        #[serde(flatten)]
        answer: StatisticalAnswer,
    },
}

impl Reply {
    pub fn message(&self) -> &str {
        match self {
            Reply::Conversational { message } | Reply::Statistical { message, .. } => message,
        }
    }
}

/// The question-answering pipeline, wired once at startup and shared by requests.
pub struct NlPipeline {
    catalog: SchemaCatalog,
    database: Arc<dyn Database>,
    classifier: IntentClassifier,
    rewriter: QueryRewriter,
    selector: TableSelector,
    execution: QueryExecutionLoop,
    summarizer: ResultSummarizer,
    responder: ConversationalResponder,
}

impl NlPipeline {
    pub fn new(
        chat: Arc<dyn ChatCompletion>,
        embedder: Option<Arc<dyn Embedder>>,
        database: Arc<dyn Database>,
        catalog: SchemaCatalog,
        settings: &PipelineSettings,
    ) -> Self {
        let domain = catalog.description.clone();
        Self {
            classifier: IntentClassifier::new(chat.clone(), domain.clone()),
            rewriter: QueryRewriter::new(chat.clone()),
            selector: TableSelector::new(
                embedder,
                database.clone(),
                settings.similarity_threshold,
                settings.max_tables,
                settings.embedding_cache,
            ),
            execution: QueryExecutionLoop::new(
                SqlGenerator::new(chat.clone(), settings.sql_dialect.clone()),
                database.clone(),
                settings.max_attempts,
                Duration::from_secs(settings.statement_timeout_secs),
                settings.read_only,
            ),
            summarizer: ResultSummarizer::new(chat.clone(), settings.summary_row_limit),
            responder: ConversationalResponder::new(chat, domain),
            catalog,
            database,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn is_gating(&self) -> bool {
        self.selector.is_gating()
    }

    fn validate_query(query: &str) -> Result<&str, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        Ok(query)
    }

    /// True when the query needs a database lookup.
    pub async fn classify_intent(
        &self,
        history: &ConversationHistory,
        query: &str,
    ) -> Result<bool, PipelineError> {
        let query = Self::validate_query(query)?;
        let intent = self
            .classifier
            .classify(history, query)
            .await
            .map_err(PipelineError::Classification)?;
        Ok(intent.is_statistical())
    }

    /// Rewrites, selects tables, reflects their schema and runs the
    /// generate-execute loop.
    pub async fn answer_statistical_query(
        &self,
        history: &ConversationHistory,
        query: &str,
    ) -> Result<StatisticalAnswer, PipelineError> {
        let query = Self::validate_query(query)?;

        let rewritten_query = self
            .rewriter
            .rewrite(history, query)
            .await
            .map_err(PipelineError::Rewrite)?;

        let selection = self.selector.select(&rewritten_query, &self.catalog).await;
        info!(
            "Using {} of {} tables (gated: {})",
            selection.tables.len(),
            self.catalog.table_count(),
            selection.gated
        );

        let schema_json = self.schema_context(&selection.tables).await?;

        match self.execution.run(&rewritten_query, &schema_json).await {
            Ok(success) => Ok(StatisticalAnswer {
                rewritten_query,
                tables: selection.tables,
                table_scores: selection.scores,
                sql: success.sql,
                attempts: success.attempts,
                rows: success.rows,
            }),
            Err(exhausted) => {
                error!("No working SQL for: {}", rewritten_query);
                Err(PipelineError::ExhaustedRetries {
                    attempts: exhausted.attempts,
                    last_sql: exhausted.last_sql,
                    last_error: exhausted.last_error,
                })
            }
        }
    }

    /// Full turn: classify, then either answer from the database and
    /// summarize, or reply conversationally.
    pub async fn respond(
        &self,
        history: &ConversationHistory,
        query: &str,
    ) -> Result<Reply, PipelineError> {
        if !self.classify_intent(history, query).await? {
            let message = self
                .responder
                .reply(history, query.trim())
                .await
                .map_err(PipelineError::Conversation)?;
            return Ok(Reply::Conversational { message });
        }

        let answer = self.answer_statistical_query(history, query).await?;
        let message = self
            .summarizer
            .summarize(history, &answer.rewritten_query, &answer.rows)
            .await
            .map_err(PipelineError::Summarization)?;

        Ok(Reply::Statistical { message, answer })
    }

    async fn schema_context(&self, tables: &[TableRef]) -> Result<String, PipelineError> {
        let reflected = self
            .database
            .reflect_schema(tables)
            .await
            .map_err(PipelineError::Schema)?;

        let mut schemas = Vec::new();
        for table in tables {
            if schemas.iter().any(|s: &serde_json::Value| s["name"] == table.schema.as_str()) {
                continue;
            }
            if let Some(schema) = self.catalog.descriptor(&table.schema) {
                schemas.push(json!({ "name": schema.name, "description": schema.description }));
            }
        }

        let context = json!({
            "domain": self.catalog.description,
            "schemas": schemas,
            "tables": reflected,
        });
        Ok(context.to_string())
    }
}
