//! LLM Gateway (C2)
//!
//! Adapts two capabilities — multimodal `classify` and text `generate` —
//! over a pluggable HTTP backend. Callers never see the wire format.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use vrenamer_common::{Result, VRenamerError};

/// Wire shape this gateway instance speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `{base}/v1beta/openai/chat/completions`, OpenAI-style `messages`.
    OpenAiCompat,
    /// `{base}/v1beta/models/{model}:generateContent`, Gemini-style `parts`.
    Native,
}

#[derive(Debug, Clone)]
pub struct ClassifyOpts {
    pub json: bool,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ClassifyOpts {
    fn default() -> Self {
        Self {
            json: true,
            temperature: 0.1,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOpts {
    pub json: bool,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerateOpts {
    fn default() -> Self {
        Self {
            json: true,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Narrow capability-typed abstraction over an LLM backend. Implementations
/// select a transport by configuration; the core never sees it.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn classify(&self, prompt: &str, images: &[PathBuf], opts: ClassifyOpts) -> Result<String>;
    async fn generate(&self, prompt: &str, opts: GenerateOpts) -> Result<String>;
}

pub struct HttpLlmGateway {
    base_url: String,
    api_key: String,
    transport: Transport,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        transport: Transport,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VRenamerError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            transport,
            model: model.into(),
            client,
        })
    }

    fn classify_url(&self) -> String {
        match self.transport {
            Transport::OpenAiCompat => format!("{}/v1beta/openai/chat/completions", self.base_url),
            Transport::Native => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
        }
    }

    fn classify_body(&self, prompt: &str, images: &[PathBuf], opts: &ClassifyOpts) -> Result<Value> {
        match self.transport {
            Transport::OpenAiCompat => {
                let mut content = vec![json!({"type": "text", "text": prompt})];
                for path in images {
                    content.push(json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/jpeg;base64,{}", encode_image(path)?)},
                    }));
                }
                Ok(json!({
                    "model": self.model,
                    "messages": [{"role": "user", "content": content}],
                    "temperature": opts.temperature,
                    "max_tokens": opts.max_tokens,
                    "response_format": {"type": if opts.json { "json_object" } else { "text" }},
                }))
            }
            Transport::Native => {
                let mut parts = vec![json!({"text": prompt})];
                for path in images {
                    parts.push(json!({
                        "inline_data": {"mime_type": "image/jpeg", "data": encode_image(path)?},
                    }));
                }
                Ok(json!({
                    "contents": [{"role": "user", "parts": parts}],
                    "generation_config": {
                        "temperature": opts.temperature,
                        "max_output_tokens": opts.max_tokens,
                    },
                }))
            }
        }
    }

    fn generate_body(&self, prompt: &str, opts: &GenerateOpts) -> Value {
        match self.transport {
            Transport::OpenAiCompat => json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": opts.temperature,
                "max_tokens": opts.max_tokens,
                "response_format": {"type": if opts.json { "json_object" } else { "text" }},
            }),
            Transport::Native => json!({
                "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                "generation_config": {
                    "temperature": opts.temperature,
                    "max_output_tokens": opts.max_tokens,
                },
            }),
        }
    }

    /// POST `body` to `url` and return the decoded JSON response. Reads raw
    /// bytes and parses manually: some upstreams advertise compression but
    /// return raw bytes, so we never rely on the HTTP client's
    /// auto-decompression.
    async fn post(&self, url: &str, body: Value) -> Result<Value> {
        debug!(url, bytes = body.to_string().len(), "llm gateway request");
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept-Encoding", "identity")
            .json(&body)
            .send()
            .await
            .map_err(|e| VRenamerError::Api {
                status: None,
                detail: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        let raw = resp.bytes().await.map_err(|e| VRenamerError::Api {
            status: Some(status.as_u16()),
            detail: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            let snippet: String = String::from_utf8_lossy(&raw).chars().take(500).collect();
            warn!(status = status.as_u16(), "llm gateway non-2xx response");
            return Err(VRenamerError::Api {
                status: Some(status.as_u16()),
                detail: snippet,
            });
        }

        serde_json::from_slice(&raw).map_err(|e| VRenamerError::Api {
            status: Some(status.as_u16()),
            detail: format!("undecodable response body: {e}"),
        })
    }

    fn extract_text(&self, data: &Value) -> Result<String> {
        match self.transport {
            Transport::OpenAiCompat => data
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| VRenamerError::Api {
                    status: None,
                    detail: "empty or malformed choice list".to_string(),
                }),
            Transport::Native => {
                let candidates = data
                    .get("candidates")
                    .and_then(|c| c.as_array())
                    .ok_or_else(|| VRenamerError::Api {
                        status: None,
                        detail: "empty or malformed choice list".to_string(),
                    })?;
                let first = candidates.first().ok_or_else(|| VRenamerError::Api {
                    status: None,
                    detail: "empty or malformed choice list".to_string(),
                })?;
                let parts = first
                    .get("content")
                    .and_then(|c| c.get("parts"))
                    .and_then(|p| p.as_array())
                    .cloned()
                    .unwrap_or_default();
                let text = parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(text)
            }
        }
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn classify(&self, prompt: &str, images: &[PathBuf], opts: ClassifyOpts) -> Result<String> {
        let url = self.classify_url();
        let body = self.classify_body(prompt, images, &opts)?;
        let data = self.post(&url, body).await?;
        self.extract_text(&data)
    }

    async fn generate(&self, prompt: &str, opts: GenerateOpts) -> Result<String> {
        let url = match self.transport {
            Transport::OpenAiCompat => format!("{}/v1beta/openai/chat/completions", self.base_url),
            Transport::Native => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
        };
        let body = self.generate_body(prompt, &opts);
        let data = self.post(&url, body).await?;
        self.extract_text(&data)
    }
}

fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(transport: Transport) -> HttpLlmGateway {
        HttpLlmGateway::new(
            "https://example.invalid",
            "test-key",
            transport,
            "gemini-test",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn openai_compat_extract_text_reads_message_content() {
        let gw = gateway(Transport::OpenAiCompat);
        let data = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(gw.extract_text(&data).unwrap(), "hello");
    }

    #[test]
    fn openai_compat_extract_text_errors_on_empty_choices() {
        let gw = gateway(Transport::OpenAiCompat);
        let data = json!({"choices": []});
        assert!(gw.extract_text(&data).is_err());
    }

    #[test]
    fn native_extract_text_joins_parts() {
        let gw = gateway(Transport::Native);
        let data = json!({
            "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]
        });
        assert_eq!(gw.extract_text(&data).unwrap(), "a\nb");
    }

    #[test]
    fn classify_url_selects_transport_shape() {
        assert!(gateway(Transport::OpenAiCompat)
            .classify_url()
            .ends_with("/chat/completions"));
        assert!(gateway(Transport::Native)
            .classify_url()
            .contains(":generateContent"));
    }
}
