use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{AppError, AppResult};

/// Fixed instruction sent ahead of every user message.
pub const EXTRACTION_PROMPT: &str = r#"You are a scheduling assistant. Read the user's message and extract a calendar event from it.
Reply with a single JSON object inside a ```json fenced code block and nothing else that looks like JSON.
The object must have exactly these keys:
- "intent": "create_event" if the user wants to schedule something, otherwise "unknown"
- "title": short title of the event
- "participants": array of participant names or e-mail addresses (use ["me"] if nobody else is mentioned)
- "date": date of the event as DD-MM-YYYY, resolving words like "tomorrow" against the current date below
- "time": start time as HH:MM in 24h format
- "reminder": how long before the event to remind, e.g. "10m", "1h", "1d"; use "" if not mentioned
If a value is not given in the message and cannot be inferred, use an empty string (or an empty array for participants)."#;

const NOW_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub instruction: String,
    pub user_text: String,
    pub now: NaiveDateTime,
}

impl CompletionRequest {
    pub fn extraction(user_text: &str, now: NaiveDateTime) -> Self {
        Self {
            instruction: EXTRACTION_PROMPT.to_string(),
            user_text: user_text.to_string(),
            now,
        }
    }

    /// Prompt parts in the order the model receives them.
    pub fn contents(&self) -> Vec<String> {
        vec![
            self.instruction.clone(),
            format!("User Message: \"{}\"", self.user_text),
            format!("Current Date and Time: \"{}\"", format_now_context(self.now)),
        ]
    }
}

pub fn format_now_context(now: NaiveDateTime) -> String {
    now.format(NOW_FORMAT).to_string()
}

/// Anything that turns a prompt into free text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Gemini `generateContent` over plain HTTPS.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set; event extraction will be unavailable");
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::UpstreamUnavailable("LLM API key not configured".into()))?;

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: request
                    .contents()
                    .into_iter()
                    .map(|text| Part { text: Some(text) })
                    .collect(),
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamUnavailable(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse LLM response: {}", e))
        })?;

        // An empty completion is handed on; the parser treats it as malformed output.
        Ok(parsed.text().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn contents_carry_prompt_message_and_timestamp() {
        let now = NaiveDate::from_ymd_opt(2025, 3, 7)
            .and_then(|d| d.and_hms_opt(8, 5, 9))
            .expect("valid timestamp");
        let request = CompletionRequest::extraction("lunch with Sam tomorrow 1pm", now);

        assert_eq!(
            request.contents(),
            vec![
                EXTRACTION_PROMPT.to_string(),
                "User Message: \"lunch with Sam tomorrow 1pm\"".to_string(),
                "Current Date and Time: \"07-03-2025 08:05:09\"".to_string(),
            ]
        );
    }

    #[test]
    fn response_text_joins_first_candidate_parts() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"```json\n"},{"text":"{}\n```"}]}},{"content":{"parts":[{"text":"ignored"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).expect("decode");
        assert_eq!(parsed.text().as_deref(), Some("```json\n{}\n```"));

        let empty: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[]}"#).expect("decode");
        assert_eq!(empty.text(), None);
    }

    #[tokio::test]
    async fn missing_api_key_is_upstream_unavailable() {
        let config = LlmConfig {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 1,
        };
        let client = GeminiClient::new(&config).expect("client");
        let result = client
            .complete(&CompletionRequest::extraction(
                "hi",
                chrono::Utc::now().naive_utc(),
            ))
            .await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }
}
