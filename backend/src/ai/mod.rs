//! Mapping suggestions from the Anthropic messages API.
//!
//! Suggestions are advisory: a reply that cannot be parsed degrades to an
//! empty list. Only transport and API failures surface as [`AiError`].
//!
//! ```rust,ignore
//! use sheetmap::ai::AiClient;
//!
//! let client = AiClient::from_env()?;
//! let suggestions = client.suggest_mappings(&columns, None).await?;
//! ```

pub mod prompt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::logs::{log_info, log_info_indent, log_warning};
use crate::config::{AppConfig, DEFAULT_AI_MODEL};
use crate::error::{AiError, AiResult};

pub use prompt::{build_messages, system_prompt, user_prompt};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 1000;

/// One suggestion. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSuggestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_transformation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

#[derive(Clone)]
pub struct AiClient {
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl AiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_AI_MODEL.to_string(),
            max_tokens: 600,
        }
    }

    /// Client configured from `ANTHROPIC_API_KEY` / `SHEETMAP_AI_MODEL`.
    pub fn from_env() -> AiResult<Self> {
        Self::from_config(&AppConfig::from_env())
    }

    pub fn from_config(config: &AppConfig) -> AiResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AiError::MissingApiKey("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key).with_model(&config.ai_model))
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Ask for target mappings of `columns` (with retries).
    pub async fn suggest_mappings(&self, columns: &[String], project: Option<&Value>) -> AiResult<Vec<MappingSuggestion>> {
        if columns.is_empty() {
            return Err(AiError::InvalidRequest("columns required".to_string()));
        }

        let mut last_error = None;

        for attempt in 1..=DEFAULT_MAX_RETRIES {
            match self.call_api(columns, project).await {
                Ok(text) => {
                    let suggestions = parse_suggestions(&text);
                    log_info_indent(format!("{} suggestion(s) received", suggestions.len()), 1);
                    return Ok(suggestions);
                }
                Err(e) => {
                    log_warning(format!("Attempt {}/{} failed: {}", attempt, DEFAULT_MAX_RETRIES, e));
                    last_error = Some(e);

                    if attempt < DEFAULT_MAX_RETRIES {
                        tokio::time::sleep(tokio::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AiError::ApiError("Unknown error".to_string())))
    }

    async fn call_api(&self, columns: &[String], project: Option<&Value>) -> AiResult<String> {
        log_info(format!("Requesting mapping suggestions ({}, {} columns)", self.model, columns.len()));

        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0.2,
            "system": system_prompt(),
            "messages": build_messages(columns, project)
        });

        let response = reqwest::Client::new()
            .post(API_URL)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(AiError::ApiError(error.error.message));
            }
            return Err(AiError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| AiError::InvalidJson(e.to_string()))?;

        Ok(response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// Suggestions found in a model reply.
///
/// Accepts `{"suggestions": [...]}` or a bare array, fenced or not. Items
/// that are not objects of the expected shape are skipped; anything
/// unparseable yields an empty list.
pub fn parse_suggestions(text: &str) -> Vec<MappingSuggestion> {
    let parsed: Value = match serde_json::from_str(&extract_json(text)) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let items = match parsed {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("suggestions") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Extract JSON from a response that may contain markdown code blocks
fn extract_json(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let after_start = start + 3;
        // Skip language identifier
        let content_start = text[after_start..]
            .find('\n')
            .map(|i| after_start + i + 1)
            .unwrap_or(after_start);

        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim().to_string();
        }
    }

    let object = text.find('{').zip(text.rfind('}'));
    let array = text.find('[').zip(text.rfind(']'));
    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };

    match span {
        Some((start, end)) if start < end => text[start..=end].to_string(),
        _ => text.trim().to_string(),
    }
}

/// One-shot helper that builds a client from the environment.
pub async fn suggest_mappings(columns: &[String], project: Option<&Value>) -> AiResult<Vec<MappingSuggestion>> {
    AiClient::from_env()?.suggest_mappings(columns, project).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_suggestions() {
        let reply = r#"Here you go:

```json
{
  "suggestions": [
    { "name": "PartNumber", "suggestedTransformation": "copy Item", "justification": "ids" }
  ]
}
```
"#;
        let suggestions = parse_suggestions(reply);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].name.as_deref(), Some("PartNumber"));
        assert_eq!(suggestions[0].suggested_transformation.as_deref(), Some("copy Item"));
    }

    #[test]
    fn test_parse_bare_array() {
        let suggestions = parse_suggestions(r#"[{"id": 1, "text": "Map Base"}, 42, {"name": "Qty"}]"#);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].text.as_deref(), Some("Map Base"));
    }

    #[test]
    fn test_malformed_reply_is_empty() {
        assert!(parse_suggestions("I cannot help with that").is_empty());
        assert!(parse_suggestions("{\"suggestions\": [").is_empty());
        assert!(parse_suggestions("{\"suggestions\": \"none\"}").is_empty());
    }

    #[test]
    fn test_extract_raw_json() {
        let response = r#"{"suggestions": []}"#;
        assert_eq!(extract_json(response), response);
    }

    #[tokio::test]
    async fn test_empty_columns_rejected() {
        let client = AiClient::new("test-key".to_string());
        let result = client.suggest_mappings(&[], None).await;
        assert!(matches!(result, Err(AiError::InvalidRequest(_))));
    }

    #[test]
    fn test_missing_key() {
        let config = AppConfig::default();
        assert!(matches!(AiClient::from_config(&config), Err(AiError::MissingApiKey(_))));
    }
}
