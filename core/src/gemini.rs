use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::provider::{ProviderRequest, ResponseShape, Role};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Tried in order when the configured model is reported missing.
pub const FALLBACK_MODELS: &[&str] = &[
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash-002",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro-002",
];

// --- Request ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

// --- Response ---

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Outcome of an HTTP status that is not a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusClass {
    ModelNotFound,
    Failure(ProviderError),
}

#[must_use]
pub fn build_request(request: &ProviderRequest) -> GenerateContentRequest {
    let contents = request
        .turns
        .iter()
        .map(|turn| Content {
            role: Some(
                match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
            ),
            parts: vec![Part {
                text: turn.text.clone(),
            }],
        })
        .collect();

    let system_instruction = (!request.system.trim().is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: request.system.clone(),
        }],
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: 0.9,
            max_output_tokens: request.max_output_tokens,
            response_mime_type: match request.shape {
                ResponseShape::Json => Some("application/json".to_string()),
                ResponseShape::Text => None,
            },
        },
    }
}

/// Concatenated text of the first candidate, empty when there is none.
#[must_use]
pub fn response_text(response: &GenerateContentResponse) -> String {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Map a non-success status and body to a provider failure.
#[must_use]
pub fn classify_status(status: u16, body: &str) -> StatusClass {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map_or_else(|_| body.trim().to_string(), |e| e.error.message);
    match status {
        404 => StatusClass::ModelNotFound,
        401 | 403 => StatusClass::Failure(ProviderError::Auth(message)),
        // Gemini reports a bad key as 400 INVALID_ARGUMENT.
        400 if message.to_lowercase().contains("api key") => {
            StatusClass::Failure(ProviderError::Auth(message))
        }
        408 | 429 | 500..=599 => {
            StatusClass::Failure(ProviderError::Transient(format!("HTTP {status}: {message}")))
        }
        _ => StatusClass::Failure(ProviderError::Rejected(format!("HTTP {status}: {message}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatTurn;

    #[test]
    fn test_build_request_json_shape() {
        let request = ProviderRequest::json("be brief", "eggs?");
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "eggs?");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_build_request_text_maps_roles() {
        let mut request = ProviderRequest::text("", "and then?");
        request.turns = vec![
            ChatTurn::user("hi"),
            ChatTurn::assistant("hello"),
            ChatTurn::user("and then?"),
        ];
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(body["contents"][1]["role"], "model");
        assert!(body.get("systemInstruction").is_none());
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"chef"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response_text(&response), "Hello chef");
    }

    #[test]
    fn test_response_text_empty_without_candidates() {
        let response: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response_text(&response), "");
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(404, ""), StatusClass::ModelNotFound);
        assert!(matches!(
            classify_status(429, r#"{"error":{"message":"quota"}}"#),
            StatusClass::Failure(ProviderError::Transient(m)) if m.contains("quota")
        ));
        assert!(matches!(
            classify_status(503, "down"),
            StatusClass::Failure(ProviderError::Transient(_))
        ));
        assert!(matches!(
            classify_status(403, "nope"),
            StatusClass::Failure(ProviderError::Auth(_))
        ));
        assert!(matches!(
            classify_status(400, r#"{"error":{"message":"API key not valid."}}"#),
            StatusClass::Failure(ProviderError::Auth(_))
        ));
        assert!(matches!(
            classify_status(400, "bad field"),
            StatusClass::Failure(ProviderError::Rejected(_))
        ));
    }
}
