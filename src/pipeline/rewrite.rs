use crate::llm::{ChatCompletion, ChatMessage, LlmError};
use crate::pipeline::conversation::ConversationHistory;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(rewritten|standalone|self-contained)?\s*(question|query)\s*:\s*").unwrap()
});

/// Turns a follow-up question into one that stands on its own.
pub struct QueryRewriter {
    chat: Arc<dyn ChatCompletion>,
}

impl QueryRewriter {
    pub fn new(chat: Arc<dyn ChatCompletion>) -> Self {
        Self { chat }
    }

    fn prepare_prompt(&self, history: &ConversationHistory) -> String {
        format!(
            r#"You rewrite follow-up questions so they can be understood without the conversation.

Conversation so far:
{}

Rewrite the user's latest question into a single self-contained question:
- Replace pronouns and vague references (he, she, they, it, that team, the same year) with the people, teams, dates and figures they refer to in the conversation
- Keep every filter, time range and entity that the conversation implies
- If the question is already self-contained, return it unchanged
- Return only the rewritten question, without explanation, quotes or labels"#,
            history.serialize()
        )
    }

    pub async fn rewrite(
        &self,
        history: &ConversationHistory,
        query: &str,
    ) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage::system(self.prepare_prompt(history)),
            ChatMessage::user(query),
        ];

        let response = self.chat.complete(&messages).await?;
        debug!("Query rewriter replied: {}", response);

        let rewritten = sanitize_rewrite(&response, query);
        info!("Rewritten query: {}", rewritten);
        Ok(rewritten)
    }
}

/// Reduces a rewriter reply to the question itself.
///
/// Keeps the first non-empty line, drops code fences, labels and wrapping
/// quotes, and falls back to the original query when nothing is left.
pub fn sanitize_rewrite(response: &str, original: &str) -> String {
    let candidate = response
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("```"))
        .unwrap_or("");

    let candidate = LABEL_PREFIX.replace(candidate, "");
    let candidate = candidate
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();

    if candidate.is_empty() {
        warn!("Rewriter returned no usable text, keeping the original query");
        original.trim().to_string()
    } else {
        candidate.to_string()
    }
}
