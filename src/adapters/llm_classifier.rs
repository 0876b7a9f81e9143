//! Staged LLM classifier over an OpenAI-compatible chat completions API
//!
//! Three prompts run in sequence, each answering strict JSON:
//! topic (market / private / others), then impact and affected assets for
//! market posts, then price direction when the impact is above none.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::domain::{Confidence, Direction, Impact, SignalAssessment};
use crate::error::{ClassificationError, PostSignalError, Result};
use crate::strategy::ClassificationProvider;

const TOPIC_PROMPT: &str = "Decide whether this post from the President of the USA belongs to the class \
market, private or others. market: anything related to financial markets, trade, tariffs or crypto. \
private: anything about private persons. others: everything else. Answer with a JSON object \
{\"classification\": \"market|private|others\", \"confidence\": <0.0-1.0>, \"reasoning\": \"<one sentence>\"}.";

const IMPACT_PROMPT: &str = "Based on this post from the President of the USA, estimate how strongly it could \
move the Bitcoin price. Answer with a JSON object {\"impact\": \"none|low|medium|high\", \
\"topics\": [<affected subjects such as \"bitcoin\", \"tariffs\", \"stocks\">], \"confidence\": <0.0-1.0>, \
\"reasoning\": \"<one sentence>\"}.";

const DIRECTION_PROMPT: &str = "This post from the President of the USA has been assessed to potentially impact \
the Bitcoin price. Predict whether the price is more likely to go up, down or stay neutral as a result. \
Answer with a JSON object {\"direction\": \"up|down|neutral\", \"confidence\": <0.0-1.0>, \
\"reasoning\": \"<one sentence>\"}.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
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
struct TopicAnswer {
    classification: String,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImpactAnswer {
    impact: String,
    #[serde(default)]
    topics: Vec<String>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionAnswer {
    direction: Option<String>,
    confidence: f64,
    reasoning: Option<String>,
}

/// Chat-completions backed classification provider
pub struct LlmClassifier {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PostSignalError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn ask<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        text: &str,
    ) -> std::result::Result<T, ClassificationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("classifier API error: {} - {}", status, body);
            return Err(classify_status(status, &body));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassificationError::permanent("response has no choices"))?;

        debug!("classifier answered {} chars", content.len());
        parse_answer(&content)
    }
}

#[async_trait]
impl ClassificationProvider for LlmClassifier {
    async fn classify_text(&self, text: &str) -> std::result::Result<SignalAssessment, ClassificationError> {
        let topic: TopicAnswer = self.ask(TOPIC_PROMPT, text).await?;
        let label = topic.classification.trim().to_ascii_lowercase();
        debug!(classification = %label, confidence = ?topic.confidence, "topic stage");
        if label != "market" {
            return Ok(early_exit([label], Impact::None, topic.reasoning));
        }

        let impact: ImpactAnswer = self.ask(IMPACT_PROMPT, text).await?;
        let level: Impact = impact
            .impact
            .parse()
            .map_err(|e: String| ClassificationError::permanent(e))?;
        let mut tags = impact.topics;
        tags.push("market".to_string());
        if level == Impact::None {
            return Ok(early_exit(tags, level, impact.reasoning));
        }

        let direction: DirectionAnswer = self.ask(DIRECTION_PROMPT, text).await?;
        assemble(tags, level, direction)
    }
}

fn early_exit<I, S>(tags: I, impact: Impact, reasoning: Option<String>) -> SignalAssessment
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let assessment = SignalAssessment::new(tags, impact, Direction::Undetermined, Confidence::ZERO);
    match reasoning {
        Some(r) => assessment.with_reasoning(r),
        None => assessment,
    }
}

fn assemble(
    tags: Vec<String>,
    impact: Impact,
    answer: DirectionAnswer,
) -> std::result::Result<SignalAssessment, ClassificationError> {
    let confidence = Confidence::from_f64(answer.confidence).ok_or_else(|| {
        ClassificationError::permanent(format!("confidence out of range: {}", answer.confidence))
    })?;
    let direction = Direction::from_label(answer.direction.as_deref());

    let assessment = SignalAssessment::new(tags, impact, direction, confidence);
    Ok(match answer.reasoning {
        Some(r) => assessment.with_reasoning(r),
        None => assessment,
    })
}

/// Rate limits and provider outages are worth retrying, other statuses are not
fn classify_status(status: StatusCode, body: &str) -> ClassificationError {
    let message = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ClassificationError::retryable(message)
    } else {
        ClassificationError::permanent(message)
    }
}

/// Decode a JSON answer, tolerating a surrounding markdown code fence
fn parse_answer<T: DeserializeOwned>(content: &str) -> std::result::Result<T, ClassificationError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body)
        .map_err(|e| ClassificationError::permanent(format!("unparseable answer ({}): {}", e, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").retryable);
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").retryable);
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").retryable);
        assert!(!classify_status(StatusCode::BAD_REQUEST, "policy").retryable);
    }

    #[test]
    fn test_parse_answer_accepts_fenced_json() {
        let answer: TopicAnswer =
            parse_answer("```json\n{\"classification\": \"market\", \"confidence\": 0.9}\n```").unwrap();
        assert_eq!(answer.classification, "market");
    }

    #[test]
    fn test_parse_answer_rejects_prose() {
        let err = parse_answer::<TopicAnswer>("I cannot help with that").unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_assemble_direction() {
        let answer: DirectionAnswer =
            parse_answer(r#"{"direction": "UP", "confidence": 0.95, "reasoning": "reserve"}"#).unwrap();
        let assessment = assemble(vec!["bitcoin".into(), "market".into()], Impact::High, answer).unwrap();

        assert_eq!(assessment.direction(), Direction::Up);
        assert_eq!(assessment.confidence().value(), dec!(0.95));
        assert!(assessment.has_tag("bitcoin"));
        assert_eq!(assessment.reasoning(), Some("reserve"));
    }

    #[test]
    fn test_assemble_rejects_out_of_range_confidence() {
        let answer = DirectionAnswer {
            direction: Some("down".into()),
            confidence: 1.5,
            reasoning: None,
        };
        assert!(!assemble(vec!["market".into()], Impact::Low, answer).unwrap_err().retryable);
    }

    #[test]
    fn test_missing_direction_is_undetermined() {
        let answer: DirectionAnswer = parse_answer(r#"{"confidence": 0.7}"#).unwrap();
        let assessment = assemble(vec!["market".into()], Impact::Medium, answer).unwrap();
        assert_eq!(assessment.direction(), Direction::Undetermined);
    }
}
