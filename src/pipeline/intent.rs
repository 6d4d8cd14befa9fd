use crate::llm::{ChatCompletion, ChatMessage, LlmError};
use crate::pipeline::conversation::ConversationHistory;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Statistical,
    Conversational,
}

impl Intent {
    pub fn is_statistical(&self) -> bool {
        matches!(self, Intent::Statistical)
    }

    // Anything that does not mention the statistical label is conversational
    pub fn from_response(response: &str) -> Self {
        if response.to_uppercase().contains("STATISTICAL") {
            Intent::Statistical
        } else {
            Intent::Conversational
        }
    }
}

/// Decides whether a message needs a database lookup at all.
pub struct IntentClassifier {
    chat: Arc<dyn ChatCompletion>,
    domain: String,
}

impl IntentClassifier {
    pub fn new(chat: Arc<dyn ChatCompletion>, domain: impl Into<String>) -> Self {
        Self {
            chat,
            domain: domain.into(),
        }
    }

    fn prepare_prompt(&self, history: &ConversationHistory) -> String {
        format!(
            r#"You classify messages sent to a data assistant for {}.

Conversation so far:
{}

Decide whether the user's latest message needs a database lookup to be answered.
Reply with exactly one word:
- STATISTICAL if it asks for figures, counts, rankings, results or any other fact stored in the database
- CONVERSATIONAL for greetings, thanks, small talk or questions about the assistant itself"#,
            self.domain,
            history.serialize()
        )
    }

    pub async fn classify(
        &self,
        history: &ConversationHistory,
        query: &str,
    ) -> Result<Intent, LlmError> {
        let messages = vec![
            ChatMessage::system(self.prepare_prompt(history)),
            ChatMessage::user(query),
        ];

        let response = self.chat.complete(&messages).await?;
        debug!("Intent classifier replied: {}", response);

        let intent = Intent::from_response(&response);
        info!("Classified query as {:?}", intent);
        Ok(intent)
    }
}
