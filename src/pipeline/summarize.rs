use crate::db::Row;
use crate::llm::{ChatCompletion, ChatMessage, LlmError};
use crate::pipeline::conversation::ConversationHistory;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns result rows into a short natural-language answer.
pub struct ResultSummarizer {
    chat: Arc<dyn ChatCompletion>,
    row_limit: usize,
}

impl ResultSummarizer {
    pub fn new(chat: Arc<dyn ChatCompletion>, row_limit: usize) -> Self {
        Self { chat, row_limit }
    }

    fn prepare_prompt(&self, history: &ConversationHistory, rows: &[Row]) -> String {
        let shown = &rows[..rows.len().min(self.row_limit)];
        let data = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());
        let truncated = if rows.len() > shown.len() {
            format!(
                "\n(Only the first {} of {} rows are shown.)",
                shown.len(),
                rows.len()
            )
        } else {
            String::new()
        };

        format!(
            r#"You answer questions using the result of a database query.

Conversation so far:
{}

Query result (JSON rows):
{}{}

Answer the user's question in one or two sentences using only these figures.
If the result is empty, say that no matching data was found."#,
            history.serialize(),
            data,
            truncated
        )
    }

    pub async fn summarize(
        &self,
        history: &ConversationHistory,
        question: &str,
        rows: &[Row],
    ) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage::system(self.prepare_prompt(history, rows)),
            ChatMessage::user(question),
        ];

        info!("Summarizing {} rows", rows.len());
        let answer = self.chat.complete(&messages).await?;
        debug!("Summary: {}", answer);
        Ok(answer.trim().to_string())
    }
}

/// Replies to small talk without touching the database.
pub struct ConversationalResponder {
    chat: Arc<dyn ChatCompletion>,
    domain: String,
}

impl ConversationalResponder {
    pub fn new(chat: Arc<dyn ChatCompletion>, domain: impl Into<String>) -> Self {
        Self {
            chat,
            domain: domain.into(),
        }
    }

    pub async fn reply(
        &self,
        history: &ConversationHistory,
        query: &str,
    ) -> Result<String, LlmError> {
        let prompt = format!(
            r#"You are a friendly assistant that answers questions about {}.

Conversation so far:
{}

Reply briefly to the user's latest message. Do not invent figures; offer to look them up instead."#,
            self.domain,
            history.serialize()
        );
        let messages = vec![ChatMessage::system(prompt), ChatMessage::user(query)];

        let answer = self.chat.complete(&messages).await?;
        Ok(answer.trim().to_string())
    }
}
