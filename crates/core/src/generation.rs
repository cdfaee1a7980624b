use crate::traits::LanguageModel;
use crate::{ConfigError, GenerationError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use url::Url;

const INSTRUCTIONS: &str = "Answer the question based on the context provided. Be direct, specific, \
and provide a comprehensive, in-depth explanation. Whenever possible, elaborate on the context and \
share additional relevant information, examples, or insights to help the user understand the topic \
better.\nFormat your answer using markdown: use bullet points, numbered lists, tables, and code \
blocks where appropriate.";

/// Prompt layout expected by the configured model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptFormat {
    /// Llama 3 chat turns delimited by header and end-of-turn tokens.
    Llama3Chat,
    Plain,
}

impl PromptFormat {
    pub fn render(self, context: &str, question: &str) -> String {
        match self {
            PromptFormat::Llama3Chat => format!(
                "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\
                 You are a helpful assistant. {INSTRUCTIONS}<|eot_id|>\n\n\
                 <|start_header_id|>user<|end_header_id|>\n\
                 Context:\n{context}\n\n\
                 Question: {question}<|eot_id|>\n\n\
                 <|start_header_id|>assistant<|end_header_id|>\n\
                 Based on the context provided:"
            ),
            PromptFormat::Plain => format!(
                "You are a helpful assistant. {INSTRUCTIONS}\n\n\
                 Context:\n{context}\n\n\
                 Question: {question}\n\n\
                 Answer:"
            ),
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptFormat::Llama3Chat => f.write_str("llama3"),
            PromptFormat::Plain => f.write_str("plain"),
        }
    }
}

impl FromStr for PromptFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llama3" | "llama3-chat" => Ok(PromptFormat::Llama3Chat),
            "plain" => Ok(PromptFormat::Plain),
            other => Err(format!(
                "unknown prompt format `{other}` (expected `llama3` or `plain`)"
            )),
        }
    }
}

/// Direct prompt used by the manual retrieve-then-generate path.
pub fn simple_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following context, answer this question: {question}\n\n\
         Context:\n{context}\n\n\
         Answer:"
    )
}

pub struct AnswerGenerator<M> {
    model: M,
    format: PromptFormat,
}

impl<M: LanguageModel> AnswerGenerator<M> {
    pub fn new(model: M, format: PromptFormat) -> Self {
        Self { model, format }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Structured generation. The answer is returned as produced; nothing
    /// checks that it is grounded in `context`.
    pub async fn generate(&self, question: &str, context: &str) -> Result<String, GenerationError> {
        let prompt = self.format.render(context, question);
        self.model.complete(&prompt).await
    }

    pub async fn generate_simple(
        &self,
        question: &str,
        context: &str,
    ) -> Result<String, GenerationError> {
        self.model.complete(&simple_prompt(context, question)).await
    }
}

/// Single-turn completions served by an Ollama daemon (`/api/generate`).
pub struct OllamaModel {
    endpoint: Url,
    model: String,
    client: Client,
}

impl OllamaModel {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint)
            .and_then(|base| base.join("api/generate"))
            .map_err(|error| ConfigError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                details: error.to_string(),
            })?;

        Ok(Self {
            endpoint,
            model: model.into(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_completion_response(&parsed)
    }
}

fn parse_completion_response(payload: &Value) -> Result<String, GenerationError> {
    if let Some(error) = payload.pointer("/error").and_then(Value::as_str) {
        return Err(GenerationError::BackendResponse {
            backend: "ollama".to_string(),
            details: error.to_string(),
        });
    }

    payload
        .pointer("/response")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::MalformedResponse("response has no `response` field".to_string())
        })
}
