use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info_span, Instrument};

use crate::config::LlmConfig;
use crate::engine::prompt::{build_prompt, parse_suggestion};
use crate::engine::suggest::{PartnerSuggester, Suggestion, SuggestError};
use crate::models::order::Order;
use crate::models::partner::Partner;

const MAX_ERROR_BODY: usize = 512;

/// Suggester backed by a hosted `generateContent` text model.
pub struct LlmSuggester {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LlmSuggester {
    pub fn new(config: &LlmConfig) -> Result<Self, SuggestError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|err| SuggestError::ServiceUnavailable(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.api_url.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
        })
    }

    async fn generate(&self, prompt: String) -> Result<String, SuggestError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json", "temperature": 0.2 }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .instrument(info_span!("generate_content"))
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SuggestError::Timeout
                } else {
                    SuggestError::ServiceUnavailable(format!("request failed: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(SuggestError::ServiceUnavailable(format!(
                "model answered {status}: {detail}"
            )));
        }

        let payload: GenerateResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                SuggestError::Timeout
            } else {
                SuggestError::MalformedResponse(format!("unexpected response body: {err}"))
            }
        })?;

        payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| SuggestError::MalformedResponse("model returned no text".to_string()))
    }
}

#[async_trait]
impl PartnerSuggester for LlmSuggester {
    fn source(&self) -> &'static str {
        "llm"
    }

    async fn suggest(&self, order: &Order, candidates: &[Partner]) -> Result<Suggestion, SuggestError> {
        let prompt = build_prompt(order, candidates);
        let text = self.generate(prompt).await?;
        debug!(order_id = %order.id, response_len = text.len(), "model answered");
        parse_suggestion(&text, order, candidates)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: Option<GenerateContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Deserialize)]
struct GeneratePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{NaiveTime, Utc};
    use httpmock::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    use super::LlmSuggester;
    use crate::config::LlmConfig;
    use crate::engine::suggest::{PartnerSuggester, SuggestError};
    use crate::models::order::{Order, OrderStatus};
    use crate::models::partner::{Partner, PartnerStatus};

    fn suggester(server: &MockServer, timeout: Duration) -> LlmSuggester {
        LlmSuggester::new(&LlmConfig {
            api_url: server.url("/v1beta"),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            timeout,
        })
        .unwrap()
    }

    fn order() -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_name: "Asha".to_string(),
            customer_phone: "+91 98450 00000".to_string(),
            items: Vec::new(),
            area: "Koramangala".to_string(),
            address: "5th Block".to_string(),
            value: 250.0,
            status: OrderStatus::Pending,
            assigned_partner_id: None,
            created_at: Utc::now(),
        }
    }

    fn partner() -> Partner {
        Partner {
            id: Uuid::new_v4(),
            name: "Ravi".to_string(),
            phone: "+91 90000 00000".to_string(),
            email: None,
            status: PartnerStatus::Active,
            assigned_areas: vec!["Koramangala".to_string()],
            shift_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            shift_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            current_load: 2,
            rating: 4.4,
            created_at: Utc::now(),
        }
    }

    fn model_reply(text: String) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] }
            }]
        })
    }

    #[tokio::test]
    async fn parses_model_choice() {
        let server = MockServer::start();
        let candidate = partner();
        let reply = format!(
            r#"{{"suggestionMade": true, "suggestedPartnerId": "{}", "reason": "Covers Koramangala with light load"}}"#,
            candidate.id
        );
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/test-model:generateContent")
                .header("x-goog-api-key", "test-key");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(model_reply(reply));
        });

        let suggestion = suggester(&server, Duration::from_secs(2))
            .suggest(&order(), &[candidate.clone()])
            .await
            .unwrap();

        assert!(suggestion.suggestion_made);
        assert_eq!(suggestion.suggested_partner_id, Some(candidate.id));
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn upstream_error_is_service_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(500).body("quota exceeded");
        });

        let err = suggester(&server, Duration::from_secs(2))
            .suggest(&order(), &[partner()])
            .await
            .unwrap_err();

        assert!(matches!(err, SuggestError::ServiceUnavailable(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "candidates": [] }));
        });

        let err = suggester(&server, Duration::from_secs(2))
            .suggest(&order(), &[partner()])
            .await
            .unwrap_err();

        assert!(matches!(err, SuggestError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(model_reply("{}".to_string()));
        });

        let err = suggester(&server, Duration::from_millis(100))
            .suggest(&order(), &[partner()])
            .await
            .unwrap_err();

        assert!(matches!(err, SuggestError::Timeout));
    }
}
