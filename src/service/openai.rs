use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{Comparator, Extractor};
use crate::error::{ComparisonError, ExtractionError, ServiceError};
use crate::record::{
    truncate, ComparisonResult, FieldDifference, FieldSchema, Record, RecordSet,
};
use crate::settings::Settings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_BACKOFF_MS: u64 = 1000;

/// Request knobs shared by both calls.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub temperature: f32,
    pub extract_max_tokens: u32,
    pub compare_max_tokens: u32,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            temperature: 0.2,
            extract_max_tokens: 16_000,
            compare_max_tokens: 8_000,
            max_retries: 3,
            backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint using
/// JSON-schema structured output. Cheap to share behind an `Arc`.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    schema: FieldSchema,
    options: RequestOptions,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        schema: FieldSchema,
        options: RequestOptions,
    ) -> Result<Self, ServiceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(OpenAiClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            schema,
            options,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ServiceError> {
        let api_key = settings.api_key().ok_or(ServiceError::MissingApiKey)?;
        let options = RequestOptions {
            temperature: settings.temperature,
            extract_max_tokens: settings.extract_max_tokens,
            compare_max_tokens: settings.compare_max_tokens,
            max_retries: settings.max_retries,
            ..RequestOptions::default()
        };
        Self::new(&settings.base_url, api_key, settings.field_schema(), options)
    }

    /// POST one chat completion, retrying rate limits and server errors.
    /// Returns the raw response body of the first successful attempt.
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0u32;

        loop {
            let start = Instant::now();
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            debug!(
                status = status.as_u16(),
                latency_ms = start.elapsed().as_millis() as u64,
                "chat completion response"
            );

            if status.is_success() {
                return Ok(body);
            }
            if !should_retry(status) || attempt == self.options.max_retries {
                return Err(ServiceError::Status {
                    status: status.as_u16(),
                    body: truncate(&body, 300),
                });
            }

            let backoff = backoff_delay(self.options.backoff, attempt);
            warn!(
                "HTTP {} from inference service (attempt {}/{}), backing off {:.1}s",
                status.as_u16(),
                attempt + 1,
                self.options.max_retries,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    fn request<'a>(
        &self,
        model: &'a str,
        max_tokens: u32,
        response_format: Value,
        system: String,
        user: String,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model,
            temperature: self.options.temperature,
            max_tokens,
            response_format,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        }
    }
}

#[async_trait]
impl Extractor for OpenAiClient {
    async fn extract(
        &self,
        document_text: &str,
        label: &str,
        model: &str,
    ) -> Result<RecordSet, ExtractionError> {
        let system = format!(
            "You are a contracts analyst specializing in system configuration extraction. \
             Extract all systems and their configurations from the {label} contract document. \
             Be precise and reference concrete contract evidence."
        );
        let user = format!(
            "Extract all systems from the following {label} contract.\n\n\
             Contract Text:\n-----\n{document_text}\n-----\n\n\
             For each system found, extract the following fields: {} (required), {}. \
             If a field is not found, use 'N/A' or 'Not specified'.",
            self.schema.key_field,
            self.schema.fields.join(", ")
        );
        let request = self.request(
            model,
            self.options.extract_max_tokens,
            extraction_format(&self.schema, label),
            system,
            user,
        );

        let body = self.complete(&request).await?;
        let content = message_content(&body)?;
        let records = parse_records(&content, &self.schema.key_field)?;
        debug!(label, records = records.len(), "extraction parsed");
        Ok(RecordSet::new(label, records))
    }
}

#[async_trait]
impl Comparator for OpenAiClient {
    async fn compare(
        &self,
        a: &Record,
        b: &Record,
        model: &str,
    ) -> Result<ComparisonResult, ComparisonError> {
        let pretty = |r: &Record| serde_json::to_string_pretty(r).unwrap_or_default();
        let system = "You are a contracts analyst specializing in system configuration comparison. \
                      Compare two system configurations and identify differences hierarchically."
            .to_string();
        let user = format!(
            "Compare the following system configurations:\n\n\
             System A:\n{}\n\nSystem B:\n{}\n\n\
             Compare all fields hierarchically: {}.\n\n\
             For each field that differs, provide detailed analysis explaining what changed, \
             why, and the impact.",
            pretty(a),
            pretty(b),
            self.schema.fields.join(", ")
        );
        let request = self.request(
            model,
            self.options.compare_max_tokens,
            comparison_format(),
            system,
            user,
        );

        let body = self.complete(&request).await?;
        let content = message_content(&body)?;
        let reply = parse_comparison(&content)?;
        let key = a.get(&self.schema.key_field).unwrap_or_default();
        Ok(ComparisonResult::matched(
            key,
            a.clone(),
            b.clone(),
            reply.differences,
            reply.analysis,
        ))
    }
}

// ── Wire types ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComparisonReply {
    #[serde(default)]
    differences: Vec<FieldDifference>,
    #[serde(default)]
    analysis: String,
}

/// Payload problems, before they are attributed to a call kind.
#[derive(Debug, PartialEq, Eq)]
enum PayloadError {
    Empty,
    Malformed(String),
}

impl From<PayloadError> for ExtractionError {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Empty => ExtractionError::EmptyResponse,
            PayloadError::Malformed(reason) => ExtractionError::MalformedPayload(reason),
        }
    }
}

impl From<PayloadError> for ComparisonError {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Empty => ComparisonError::EmptyResponse,
            PayloadError::Malformed(reason) => ComparisonError::MalformedPayload(reason),
        }
    }
}

// ── Schemas ──

fn extraction_format(schema: &FieldSchema, label: &str) -> Value {
    let mut properties = Map::new();
    properties.insert(schema.key_field.clone(), json!({ "type": "string" }));
    for field in &schema.fields {
        properties.insert(field.clone(), json!({ "type": "string" }));
    }
    let description = format!("List of all systems extracted from {label} contract");

    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "records_extraction",
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "records": {
                        "type": "array",
                        "description": description,
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": [schema.key_field],
                            "properties": properties,
                        }
                    }
                },
                "required": ["records"]
            }
        }
    })
}

fn comparison_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "record_comparison",
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "required": ["key", "status"],
                "properties": {
                    "key": { "type": "string" },
                    "status": { "type": "string", "enum": ["matched"] },
                    "differences": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["field_name", "value_a", "value_b", "analysis"],
                            "properties": {
                                "field_name": { "type": "string" },
                                "value_a": { "type": "string" },
                                "value_b": { "type": "string" },
                                "analysis": { "type": "string" }
                            }
                        }
                    },
                    "analysis": { "type": "string" }
                }
            }
        }
    })
}

// ── Parsing ──

fn message_content(body: &str) -> Result<String, PayloadError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| PayloadError::Malformed(format!("unexpected response envelope: {e}")))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(PayloadError::Empty)
}

fn parse_records(content: &str, key_field: &str) -> Result<Vec<Record>, PayloadError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| PayloadError::Malformed(format!("invalid JSON: {e}")))?;
    let items = value
        .get("records")
        .and_then(Value::as_array)
        .ok_or_else(|| PayloadError::Malformed("missing `records` array".into()))?;

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| record_from_json(idx, item, key_field))
        .collect()
}

fn record_from_json(idx: usize, item: &Value, key_field: &str) -> Result<Record, PayloadError> {
    let obj = item
        .as_object()
        .ok_or_else(|| PayloadError::Malformed(format!("record {idx} is not an object")))?;

    let mut record = Record::new();
    for (name, value) in obj {
        if let Some(s) = coerce(value) {
            record.insert(name.clone(), s);
        }
    }
    if record.key(key_field).is_none() {
        return Err(PayloadError::Malformed(format!(
            "record {idx} has no `{key_field}`"
        )));
    }
    Ok(record)
}

/// Service values as plain strings; `null` means absent.
fn coerce(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_comparison(content: &str) -> Result<ComparisonReply, PayloadError> {
    serde_json::from_str(content).map_err(|e| PayloadError::Malformed(format!("invalid JSON: {e}")))
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

// ── Tests ──
