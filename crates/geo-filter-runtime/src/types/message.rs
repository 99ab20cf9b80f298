//! Cross-context lookup messages.
//!
//! Both directions travel as one JSON object per line, discriminated by the
//! `type` field. The bridge must echo `requestId` unchanged.

use serde::{Deserialize, Serialize};

use geo_filter::AuthorId;

/// Any message that crosses the context boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    LookupRequest(LookupRequest),
    LookupResponse(LookupResponse),
}

/// Ask the privileged side for an author's account location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    pub request_id: u64,
    pub author_id: AuthorId,
}

/// Result of one lookup, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub request_id: u64,
    pub author_id: AuthorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_location_text: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LookupResponse {
    pub fn success(request: &LookupRequest, raw_location_text: String) -> Self {
        Self {
            request_id: request.request_id,
            author_id: request.author_id.clone(),
            raw_location_text: Some(raw_location_text),
            success: true,
            error_message: None,
        }
    }

    pub fn failure(request: &LookupRequest, error_message: String) -> Self {
        Self {
            request_id: request.request_id,
            author_id: request.author_id.clone(),
            raw_location_text: None,
            success: false,
            error_message: Some(error_message),
        }
    }
}
