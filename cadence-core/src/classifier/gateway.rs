//! Chat-completions gateway classifier.
//!
//! Sends the payload as a user message and forces a single tool call whose
//! JSON arguments carry the result. Status 429 maps to
//! [`ClassifierError::RateLimited`] and 402 to
//! [`ClassifierError::QuotaExhausted`]; there are no retries.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    Classification, Classifier, ClassifierError, ClassifierPayload, Prediction, PredictionRequest,
};
use crate::config::ClassifierConfig;
use crate::types::CognitiveType;

const CLASSIFY_TOOL: &str = "analyze_intelligence";
const PREDICT_TOOL: &str = "predict_behavior";

const CLASSIFY_PROMPT: &str = "You analyze learner behavior from structured quiz metrics \
and classification history. Assign exactly one cognitive type, judge whether the type is \
drifting, score predictability from 0 to 100, list misconception clusters, describe the \
learner's energy pattern, report breakthrough, stress, shift or fatigue events, summarize the \
behavioral signature and recommend a practice plan. Answer only through the analyze_intelligence tool.";

const PREDICT_PROMPT: &str = "You forecast how a learner will perform on the next question \
from their behavioral profile. Answer only through the predict_behavior tool.";

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Vec<serde_json::Value>,
    tool_choice: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    arguments: String,
}

// ────────────────────────────────────────────────────────────────────────────
// GatewayClassifier
// ────────────────────────────────────────────────────────────────────────────

/// Classifier backed by an OpenAI-compatible chat completions gateway.
pub struct GatewayClassifier {
    config: ClassifierConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GatewayClassifier {
    /// Create a classifier with an explicit API key.
    pub fn new(config: ClassifierConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: Some(api_key.into()),
            client: reqwest::Client::new(),
        }
    }

    /// Create a classifier reading the key from `config.api_key_env`.
    ///
    /// A missing key is reported on the first call, not here.
    pub fn from_env(config: ClassifierConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Check if classification is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the configured timeout duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds.into())
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn call_tool<T: DeserializeOwned>(
        &self,
        system: &str,
        user: String,
        tool: serde_json::Value,
        tool_name: &str,
    ) -> Result<T, ClassifierError> {
        if !self.config.enabled {
            return Err(ClassifierError::Disabled);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ClassifierError::MissingApiKey(self.config.api_key_env.clone()))?;

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            tools: vec![tool],
            tool_choice: json!({ "type": "function", "function": { "name": tool_name } }),
        };

        debug!(model = %self.config.model, tool = tool_name, "Calling classifier gateway");

        let send = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send();
        let response = tokio::time::timeout(self.timeout(), send)
            .await
            .map_err(|_| ClassifierError::Timeout(self.config.timeout_seconds))?
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            let err = status_error(status, body);
            warn!(status, error = %err, "Classifier gateway rejected request");
            return Err(err);
        }

        parse_tool_arguments(&body)
    }
}

impl std::fmt::Debug for GatewayClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClassifier")
            .field("enabled", &self.config.enabled)
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("has_api_key", &self.api_key.is_some())
            .field("timeout_seconds", &self.config.timeout_seconds)
            .finish()
    }
}

#[async_trait]
impl Classifier for GatewayClassifier {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn classify(&self, payload: &ClassifierPayload) -> Result<Classification, ClassifierError> {
        let user = format!(
            "Analyze this learner's behavioral profile:\n{}",
            to_pretty_json(payload)?
        );
        let classification: Classification = self
            .call_tool(CLASSIFY_PROMPT, user, classify_tool(), CLASSIFY_TOOL)
            .await?;
        classification.validate()?;
        Ok(classification)
    }

    async fn predict(&self, request: &PredictionRequest) -> Result<Prediction, ClassifierError> {
        let q = &request.upcoming_question;
        let user = format!(
            "Learner profile:\n{}\n\nUpcoming question:\nTopic: {}\nDifficulty: {}/5\nHas hint: {}",
            to_pretty_json(&request.feature_vector)?,
            q.topic_id,
            q.difficulty_level,
            q.has_hint
        );
        let prediction: Prediction = self
            .call_tool(PREDICT_PROMPT, user, predict_tool(), PREDICT_TOOL)
            .await?;
        prediction.validate()?;
        Ok(prediction)
    }
}

/// Map a non-success status to its error subtype.
pub fn status_error(status: u16, body: String) -> ClassifierError {
    match status {
        429 => ClassifierError::RateLimited,
        402 => ClassifierError::QuotaExhausted,
        _ => ClassifierError::Http { status, body },
    }
}

/// Parse the first tool call's JSON arguments out of a completion body.
pub fn parse_tool_arguments<T: DeserializeOwned>(body: &str) -> Result<T, ClassifierError> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::Malformed(format!("invalid completion body: {e}")))?;
    let call = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.tool_calls.into_iter().next())
        .ok_or_else(|| ClassifierError::Malformed("no tool call in response".into()))?;
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| ClassifierError::Malformed(format!("invalid tool arguments: {e}")))
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, ClassifierError> {
    serde_json::to_string_pretty(value).map_err(|e| ClassifierError::Malformed(e.to_string()))
}

fn classify_tool() -> serde_json::Value {
    let types: Vec<&str> = CognitiveType::ALL.iter().map(CognitiveType::as_str).collect();
    json!({
        "type": "function",
        "function": {
            "name": CLASSIFY_TOOL,
            "description": "Complete cognitive analysis of one learner",
            "parameters": {
                "type": "object",
                "properties": {
                    "cognitive_type": { "type": "string", "enum": types },
                    "confidence_score": { "type": "number" },
                    "reasoning": { "type": "string" },
                    "recommended_difficulty": { "type": "integer", "minimum": 1, "maximum": 5 },
                    "practice_type": { "type": "string" },
                    "time_limit_mode": { "type": "string" },
                    "learning_strategy_summary": { "type": "string" },
                    "cognitive_predictability_index": { "type": "number", "description": "0-100" },
                    "cpi_label": {
                        "type": "string",
                        "enum": ["Highly Predictable", "Predictable", "Moderate", "Unpredictable", "Highly Unpredictable"]
                    },
                    "drift_detected": { "type": "boolean" },
                    "drift_description": { "type": "string" },
                    "misconception_clusters": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string" },
                                "description": { "type": "string" },
                                "frequency": { "type": "integer" }
                            },
                            "required": ["type", "description"],
                            "additionalProperties": false
                        }
                    },
                    "energy_analysis": {
                        "type": "object",
                        "properties": {
                            "optimal_study_time": { "type": "string" },
                            "recommended_session_duration_minutes": { "type": "integer" },
                            "fatigue_warning": { "type": "string" },
                            "accuracy_decay_rate": { "type": "number" }
                        },
                        "required": ["optimal_study_time", "recommended_session_duration_minutes"],
                        "additionalProperties": false
                    },
                    "behavioral_signature": { "type": "string" },
                    "detected_events": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "event_type": { "type": "string", "enum": ["breakthrough", "stress", "shift", "fatigue"] },
                                "description": { "type": "string" }
                            },
                            "required": ["event_type", "description"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": [
                    "cognitive_type", "confidence_score", "reasoning", "recommended_difficulty",
                    "practice_type", "learning_strategy_summary", "cognitive_predictability_index",
                    "cpi_label", "drift_detected", "misconception_clusters", "energy_analysis",
                    "behavioral_signature", "detected_events"
                ],
                "additionalProperties": false
            }
        }
    })
}

fn predict_tool() -> serde_json::Value {
    json!({
        "type": "function",
        "function": {
            "name": PREDICT_TOOL,
            "description": "Predict learner behavior on the upcoming question",
            "parameters": {
                "type": "object",
                "properties": {
                    "predicted_response_time_ms": { "type": "integer" },
                    "predicted_retry_probability": { "type": "number" },
                    "predicted_error_probability": { "type": "number" },
                    "predicted_mistake_type": { "type": "string" },
                    "predicted_hesitation_risk": { "type": "number" },
                    "confidence_instability": { "type": "number" }
                },
                "required": [
                    "predicted_response_time_ms", "predicted_retry_probability",
                    "predicted_error_probability", "predicted_mistake_type",
                    "predicted_hesitation_risk", "confidence_instability"
                ],
                "additionalProperties": false
            }
        }
    })
}
