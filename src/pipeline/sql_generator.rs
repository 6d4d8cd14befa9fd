use crate::llm::{ChatCompletion, ChatMessage, LlmError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// One candidate statement, exactly as the model wrote it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedSql {
    pub statement_text: String,
    pub attempt_number: usize,
}

/// A statement that did not run, and why
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub sql: String,
    pub error: String,
}

pub struct SqlGenerator {
    chat: Arc<dyn ChatCompletion>,
    dialect: String,
}

impl SqlGenerator {
    pub fn new(chat: Arc<dyn ChatCompletion>, dialect: impl Into<String>) -> Self {
        Self {
            chat,
            dialect: dialect.into(),
        }
    }

    fn prepare_prompt(&self, schema_json: &str) -> String {
        format!(
            r#"You translate questions into {dialect} SQL.

### Database schema (JSON):
{schema_json}

### Rules:
- Use only the tables and columns listed in the schema, with their exact spelling and case
- Always qualify tables with their schema, e.g. schema_name.table_name
- Use table aliases when joining to avoid ambiguous columns
- When creating a ratio, cast the numerator to a floating point type
- Generate exactly one read-only statement

### Output format:
- Return the SQL statement only, on a single line
- No markdown, no code fences, no comments, no explanation
- No backslashes or escape sequences
- Separate tokens with single spaces, including after commas and other punctuation"#,
            dialect = self.dialect,
            schema_json = schema_json
        )
    }

    fn prepare_request(&self, question: &str, previous: Option<&FailedAttempt>) -> String {
        match previous {
            None => question.to_string(),
            Some(failed) => format!(
                r#"{question}

### Fix this failing query:
The previous query failed with this error:
{error}

Failing query:
{sql}

Return a corrected statement that answers the question and avoids this error.
It must follow the same output format: one line of SQL, nothing else."#,
                question = question,
                error = failed.error,
                sql = failed.sql
            ),
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema_json: &str,
        previous: Option<&FailedAttempt>,
        attempt_number: usize,
    ) -> Result<GeneratedSql, LlmError> {
        let messages = vec![
            ChatMessage::system(self.prepare_prompt(schema_json)),
            ChatMessage::user(self.prepare_request(question, previous)),
        ];

        info!("Generating SQL (attempt {})", attempt_number);
        let statement_text = self.chat.complete(&messages).await?;
        debug!("Generated SQL: {}", statement_text);

        Ok(GeneratedSql {
            statement_text,
            attempt_number,
        })
    }
}
