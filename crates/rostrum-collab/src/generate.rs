//! Rebuttal generation collaborator.

use crate::error::CollabError;
use async_trait::async_trait;
use rostrum_types::{Speaker, Stance, Utterance};
use serde::Deserialize;
use std::time::Duration;

/// Timeout for a single generation request.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(25);

/// Everything the generator needs to argue one turn.
#[derive(Debug, Clone)]
pub struct RebuttalRequest {
    pub topic: String,
    /// The stance the AI is arguing.
    pub stance: Stance,
    /// The user's stance, for prompt framing.
    pub opponent_stance: Stance,
    /// Most recent persisted messages, oldest first.
    pub context: Vec<Utterance>,
    /// The freshly transcribed user argument.
    pub argument: String,
    pub language: String,
}

/// Produces the AI opponent's counter-argument for one turn.
#[async_trait]
pub trait RebuttalGenerator: Send + Sync {
    async fn generate(&self, request: &RebuttalRequest) -> Result<String, CollabError>;
}

/// Renders the debate context into a single prompt.
///
/// Layout: topic and stances, then the prior exchange with "You"/"Opponent"
/// attribution, then the latest argument and the counter-argument
/// instruction.
pub fn build_prompt(request: &RebuttalRequest) -> String {
    let mut prompt = format!("Debate Topic: {}\n", request.topic);
    prompt.push_str(&format!("Your stance: {}\n", request.stance.as_str()));
    prompt.push_str(&format!(
        "Opponent's stance: {}\n\n",
        request.opponent_stance.as_str()
    ));

    if !request.context.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for message in &request.context {
            let attribution = if message.speaker == Speaker::Ai {
                "You"
            } else {
                "Opponent"
            };
            prompt.push_str(&format!("{}: {}\n", attribution, message.text));
        }
    }

    prompt.push_str(&format!(
        "\nOpponent's latest argument: {}\n",
        request.argument
    ));
    prompt.push_str(&format!(
        "Provide a strong counter-argument from the {} perspective. \
         Keep it concise and compelling. Respond in {}.",
        request.stance.as_str(),
        request.language
    ));
    prompt
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpRebuttalGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpRebuttalGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl RebuttalGenerator for HttpRebuttalGenerator {
    async fn generate(&self, request: &RebuttalRequest) -> Result<String, CollabError> {
        let prompt = build_prompt(request);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a skilled competitive debater arguing your assigned stance."
                },
                { "role": "user", "content": prompt }
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(GENERATION_TIMEOUT)
            .send()
            .await
            .map_err(|e| CollabError::Generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CollabError::Generation(format!(
                "endpoint returned {}: {}",
                status, detail
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Generation(format!("malformed response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(CollabError::Generation("empty completion".to_string()));
        }
        Ok(text)
    }
}
