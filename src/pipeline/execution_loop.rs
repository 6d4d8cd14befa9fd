//! Bounded generate-then-execute loop.
//!
//! Every attempt regenerates the statement from scratch with the previous
//! failure as extra context. Generation failures, guard rejections and
//! execution errors all consume an attempt.

use crate::db::{Database, Row};
use crate::pipeline::sql_generator::{FailedAttempt, SqlGenerator};
use crate::pipeline::sql_guard::prepare_statement;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    /// Statement as executed, or the raw model output when it never reached the database
    pub sql: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LoopSuccess {
    pub sql: String,
    pub rows: Vec<Row>,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone)]
pub struct LoopExhausted {
    pub attempts: Vec<AttemptRecord>,
    pub last_sql: Option<String>,
    pub last_error: String,
}

pub struct QueryExecutionLoop {
    generator: SqlGenerator,
    database: Arc<dyn Database>,
    max_attempts: usize,
    statement_timeout: Duration,
    read_only: bool,
}

impl QueryExecutionLoop {
    pub fn new(
        generator: SqlGenerator,
        database: Arc<dyn Database>,
        max_attempts: usize,
        statement_timeout: Duration,
        read_only: bool,
    ) -> Self {
        Self {
            generator,
            database,
            max_attempts,
            statement_timeout,
            read_only,
        }
    }

    pub async fn run(&self, question: &str, schema_json: &str) -> Result<LoopSuccess, LoopExhausted> {
        let mut records: Vec<AttemptRecord> = Vec::with_capacity(self.max_attempts);
        let mut feedback: Option<FailedAttempt> = None;
        let mut last_sql: Option<String> = None;
        let mut last_error = String::from("no attempt was made");

        for attempt in 1..=self.max_attempts {
            info!("Query attempt {} of {}", attempt, self.max_attempts);
            let started = Instant::now();

            let generated = match self
                .generator
                .generate(question, schema_json, feedback.as_ref(), attempt)
                .await
            {
                Ok(generated) => generated,
                Err(e) => {
                    // Earlier feedback stays in place for the next attempt
                    warn!("SQL generation failed on attempt {}: {}", attempt, e);
                    last_error = e.to_string();
                    records.push(AttemptRecord {
                        attempt,
                        sql: None,
                        error: Some(last_error.clone()),
                        elapsed_ms: elapsed_ms(started),
                    });
                    continue;
                }
            };

            let statement = match prepare_statement(&generated.statement_text, self.read_only) {
                Ok(statement) => statement,
                Err(e) => {
                    warn!("Generated statement rejected on attempt {}: {}", attempt, e);
                    last_error = e.to_string();
                    last_sql = Some(generated.statement_text.clone());
                    records.push(AttemptRecord {
                        attempt,
                        sql: Some(generated.statement_text.clone()),
                        error: Some(last_error.clone()),
                        elapsed_ms: elapsed_ms(started),
                    });
                    feedback = Some(FailedAttempt {
                        sql: generated.statement_text,
                        error: last_error.clone(),
                    });
                    continue;
                }
            };

            info!("Executing: {}", statement);
            match self.database.execute_sql(&statement, self.statement_timeout).await {
                Ok(rows) => {
                    info!(
                        "Query succeeded on attempt {} with {} rows",
                        attempt,
                        rows.len()
                    );
                    records.push(AttemptRecord {
                        attempt,
                        sql: Some(statement.clone()),
                        error: None,
                        elapsed_ms: elapsed_ms(started),
                    });
                    return Ok(LoopSuccess {
                        sql: statement,
                        rows,
                        attempts: records,
                    });
                }
                Err(e) => {
                    warn!("Execution failed on attempt {}: {}", attempt, e);
                    last_error = e.to_string();
                    last_sql = Some(statement.clone());
                    records.push(AttemptRecord {
                        attempt,
                        sql: Some(statement.clone()),
                        error: Some(last_error.clone()),
                        elapsed_ms: elapsed_ms(started),
                    });
                    feedback = Some(FailedAttempt {
                        sql: statement,
                        error: last_error.clone(),
                    });
                }
            }
        }

        error!(
            "Giving up after {} attempts, last error: {}",
            records.len(),
            last_error
        );
        Err(LoopExhausted {
            attempts: records,
            last_sql,
            last_error,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
