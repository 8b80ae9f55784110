use crate::config::LlmConfig;
use crate::llm::{
    ChatMessage, ChatModel, ChatOutcome, EmbeddingModel, LlmError, ToolInvocation, ToolSpec,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

pub struct OpenAiEmbeddingModel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

fn build_client() -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| LlmError::ConnectionError(e.to_string()))
}

fn api_settings(config: &LlmConfig) -> Result<(String, String), LlmError> {
    let api_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let api_key = config.api_key.clone().ok_or_else(|| {
        LlmError::ConfigError("API key is required for the OpenAI provider".to_string())
    })?;

    Ok((api_url, api_key))
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let (api_url, api_key) = api_settings(config)?;

        Ok(Self {
            client: build_client()?,
            api_url,
            api_key,
            model: config.model.clone(),
        })
    }

    fn to_wire(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.clone(),
                content: m.content.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|c| WireToolCall {
                                id: c.id.clone(),
                                kind: "function".to_string(),
                                function: WireFunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::to_wire(messages),
            temperature: 0.0,
            tools: if tools.is_empty() {
                None
            } else {
                Some(
                    tools
                        .iter()
                        .map(|t| WireTool {
                            kind: "function".to_string(),
                            function: WireFunction {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect(),
                )
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                response.status()
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?;

        if let Some(calls) = choice.message.tool_calls {
            if !calls.is_empty() {
                let invocations = calls
                    .into_iter()
                    .map(|c| ToolInvocation {
                        id: c.id,
                        name: c.function.name,
                        arguments: c.function.arguments,
                    })
                    .collect();
                return Ok(ChatOutcome::ToolCalls(invocations));
            }
        }

        let content = choice.message.content.ok_or_else(|| {
            LlmError::ResponseError("Response carried neither content nor tool calls".to_string())
        })?;

        debug!("Chat completion returned {} chars", content.len());
        Ok(ChatOutcome::Message(content))
    }
}

impl OpenAiEmbeddingModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let (api_url, api_key) = api_settings(config)?;

        Ok(Self {
            client: build_client()?,
            api_url,
            api_key,
            model: config.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddingModel {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                response.status()
            )));
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        if embedding_response.data.len() != texts.len() {
            return Err(LlmError::ResponseError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embedding_response.data.len()
            )));
        }

        // The API does not guarantee response order
        let mut entries = embedding_response.data;
        entries.sort_by_key(|e| e.index);

        Ok(entries.into_iter().map(|e| e.embedding).collect())
    }
}
