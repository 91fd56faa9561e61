use anyhow::Context as _;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-preview";

pub const OCR_INSTRUCTIONS: &str = "Extract all text content from this image. Present it as a \
continuous block of text, maintaining original paragraph breaks if discernible. Do not \
summarize, interpret, or add any commentary. Only provide the extracted text.";

pub fn chat_completions_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

#[derive(Debug, Clone)]
pub struct OcrClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    referer: Option<String>,
    app_title: Option<String>,
}

impl OcrClient {
    pub fn new(client: reqwest::Client, base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: chat_completions_endpoint(base_url),
            model: model.into(),
            referer: None,
            app_title: None,
        }
    }

    /// Attribution headers (`HTTP-Referer`, `X-Title`) sent with every request.
    pub fn with_attribution(mut self, referer: Option<String>, app_title: Option<String>) -> Self {
        self.referer = referer;
        self.app_title = app_title;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn extract_text(
        &self,
        api_key: &str,
        image_data_url: &str,
    ) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": OCR_INSTRUCTIONS },
                        { "type": "image_url", "image_url": { "url": image_data_url } },
                    ],
                }
            ],
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body);
        if let Some(referer) = self.referer.as_deref() {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(app_title) = self.app_title.as_deref() {
            request = request.header("X-Title", app_title);
        }

        tracing::info!(endpoint = %self.endpoint, model = %self.model, "submit capture for ocr");
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read OCR response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .map(str::to_owned)
                    .unwrap_or_else(|| status.to_string())
            });
            anyhow::bail!("OCR API Error: {message}");
        }

        let value: serde_json::Value = serde_json::from_str(&raw).context("parse OCR response")?;
        extract_message_text(&value)
            .ok_or_else(|| anyhow::anyhow!("OCR returned no text or unexpected structure."))
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

/// Text of the first choice. `content` may be a plain string or an array of parts, in which
/// case the first `text` part is used.
pub fn extract_message_text(value: &serde_json::Value) -> Option<String> {
    let content = value.pointer("/choices/0/message/content")?;

    let text = match content {
        serde_json::Value::String(text) => text.as_str(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .find(|part| part.get("type").and_then(|v| v.as_str()) == Some("text"))
            .and_then(|part| part.get("text"))
            .and_then(|v| v.as_str())?,
        _ => return None,
    };

    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_owned())
}
