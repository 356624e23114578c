//! Language-generation backend contract.
//!
//! Every agent in the simulation (persona, grader, router classifier,
//! summariser) talks to the backend through `LLMClient`, so the backend can be
//! swapped between an OpenAI-compatible service and a scripted stand-in.

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use std::{collections::HashMap, pin::Pin, time::Duration};
use tracing::debug;

/// Who authored a message in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Which agent a request is made on behalf of. Used for tracing and by the
/// scripted client to pick a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionPurpose {
    Persona,
    TurnNote,
    PhaseClassification,
    FinalGrade,
    Summary,
    Title,
}

/// A backend request: messages plus sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: CompletionPurpose,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the backend to answer with a single JSON object.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(purpose: CompletionPurpose, messages: Vec<ChatMessage>) -> Self {
        Self {
            purpose,
            messages,
            temperature: 0.7,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone, PartialEq)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// A stream of text chunks from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent>> + Send>>;

/// A generic client for interacting with an LLM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call and returns the full text answer.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Starts a streaming call. The stream is finite and cannot be restarted.
    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn to_openai_messages(messages: Vec<ChatMessage>) -> Result<Vec<ChatCompletionRequestMessage>> {
        messages
            .into_iter()
            .map(|msg| -> Result<ChatCompletionRequestMessage> {
                Ok(match msg.role {
                    ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                    ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                    ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                })
            })
            .collect()
    }

    fn build_request(
        &self,
        request: CompletionRequest,
        stream: bool,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(Self::to_openai_messages(request.messages)?)
            .temperature(request.temperature);
        if let Some(max_tokens) = request.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if request.json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }
        if stream {
            args.stream(true);
        }
        Ok(args.build()?)
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        debug!(purpose = ?request.purpose, model = %self.model, "Requesting completion");
        let request = self.build_request(request, false)?;
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")
    }

    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream> {
        debug!(purpose = ?request.purpose, model = %self.model, "Opening completion stream");
        let request = self.build_request(request, true)?;
        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    if content.is_empty() {
                        None
                    } else {
                        Some(Ok(LLMStreamEvent::TextChunk(content)))
                    }
                }
                Err(e) => Some(Err(anyhow!(e))),
            }
        })))
    }
}

/// A deterministic `LLMClient` for local development and integration tests.
///
/// Each purpose has a canned reply; streamed replies are split on whitespace
/// boundaries so they arrive as several fragments.
#[derive(Debug, Clone)]
pub struct ScriptedLLMClient {
    replies: HashMap<CompletionPurpose, String>,
    token_delay: Duration,
}

impl Default for ScriptedLLMClient {
    fn default() -> Self {
        let replies = HashMap::from([
            (
                CompletionPurpose::Persona,
                "I... um, I've been washing my hands a lot lately. It's kind of taking over my day."
                    .to_string(),
            ),
            (
                CompletionPurpose::TurnNote,
                "[~] Reasonable question; keep exploring the presenting complaint.".to_string(),
            ),
            (CompletionPurpose::PhaseClassification, "no".to_string()),
            (
                CompletionPurpose::FinalGrade,
                serde_json::json!({
                    "summary": "A steady interview that explored the presenting complaint.",
                    "criteria": [
                        {"criterion": "Rapport Building", "score": 7, "feedback": "Warm introduction."},
                        {"criterion": "History Taking", "score": 6, "feedback": "Covered onset and duration."},
                        {"criterion": "Risk Assessment", "score": 6, "feedback": "Asked about safety."},
                        {"criterion": "Mental State Examination", "score": 5, "feedback": "Partial MSE."},
                        {"criterion": "Clinical Reasoning", "score": 5, "feedback": "Tentative formulation."},
                        {"criterion": "Communication Skills", "score": 7, "feedback": "Clear language."},
                        {"criterion": "Professionalism", "score": 8, "feedback": "Respectful throughout."}
                    ]
                })
                .to_string(),
            ),
            (
                CompletionPurpose::Summary,
                "The student has explored James's hand-washing rituals and their impact on daily life."
                    .to_string(),
            ),
            (CompletionPurpose::Title, "OCD Initial Assessment".to_string()),
        ]);
        Self {
            replies,
            token_delay: Duration::ZERO,
        }
    }
}

impl ScriptedLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the canned reply for one purpose.
    pub fn with_reply(mut self, purpose: CompletionPurpose, reply: impl Into<String>) -> Self {
        self.replies.insert(purpose, reply.into());
        self
    }

    /// Pauses before each streamed fragment.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    fn reply_for(&self, purpose: CompletionPurpose) -> Result<String> {
        self.replies
            .get(&purpose)
            .cloned()
            .with_context(|| format!("No scripted reply for {purpose:?}"))
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.reply_for(request.purpose)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream> {
        let reply = self.reply_for(request.purpose)?;
        let fragments: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.token_delay;
        Ok(Box::pin(stream::iter(fragments).then(move |fragment| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(LLMStreamEvent::TextChunk(fragment))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_stream_is_lossless() {
        let client = ScriptedLLMClient::new().with_reply(CompletionPurpose::Persona, "I feel  tired today.");
        let request = CompletionRequest::new(CompletionPurpose::Persona, vec![]);
        let chunks: Vec<String> = client
            .stream(request)
            .await
            .unwrap()
            .map(|event| match event.unwrap() {
                LLMStreamEvent::TextChunk(text) => text,
            })
            .collect()
            .await;

        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), "I feel  tired today.");
    }

    #[tokio::test]
    async fn test_scripted_complete_uses_purpose() {
        let client = ScriptedLLMClient::new().with_reply(CompletionPurpose::Title, "Sleep Trouble History");
        let title = client
            .complete(CompletionRequest::new(CompletionPurpose::Title, vec![]))
            .await
            .unwrap();
        assert_eq!(title, "Sleep Trouble History");
    }

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new(CompletionPurpose::FinalGrade, vec![ChatMessage::user("hi")])
            .temperature(0.1)
            .max_tokens(100)
            .json();
        assert_eq!(request.temperature, 0.1);
        assert_eq!(request.max_tokens, Some(100));
        assert!(request.json_mode);
        assert_eq!(request.messages[0].role, ChatRole::User);
    }
}
