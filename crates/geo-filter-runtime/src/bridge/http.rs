//! Authenticated account lookup over the web client's GraphQL endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use geo_filter::AuthorId;

use super::LookupBackend;
use crate::config::ApiConfig;
use crate::types::LookupError;

/// GraphQL operation that exposes the account's "based in" field.
const OPERATION: &str = "AboutAccountQuery";

/// HTTP lookup backend. Must only be constructed on the privileged side.
#[derive(Clone)]
pub struct HttpLookup {
    client: reqwest::Client,
    api: ApiConfig,
}

impl HttpLookup {
    pub fn new(api: ApiConfig, timeout: Duration) -> Result<Self, LookupError> {
        if api.bearer_token.is_none() {
            return Err(LookupError::MissingCredentials("bearer token"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        Ok(Self { client, api })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/i/api/graphql/{}/{OPERATION}",
            self.api.base_url.trim_end_matches('/'),
            self.api.query_id
        )
    }
}

#[async_trait]
impl LookupBackend for HttpLookup {
    async fn account_location(&self, author: &AuthorId) -> Result<String, LookupError> {
        let variables = serde_json::json!({ "screenName": author.as_str() }).to_string();
        let bearer = self.api.bearer_token.as_deref().unwrap_or_default();

        let response = self
            .client
            .get(self.endpoint())
            .query(&[("variables", variables)])
            .header("authorization", format!("Bearer {bearer}"))
            .header("x-twitter-active-user", "yes")
            .header("x-twitter-auth-type", "OAuth2Session")
            .header("x-twitter-client-language", "en")
            .header("x-csrf-token", self.api.csrf_token.as_deref().unwrap_or_default())
            .header("content-type", "application/json")
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Lookup API error {}: {body}", status.as_u16());
            return Err(LookupError::Http(status.as_u16()));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LookupError::Decode(e.to_string()))?;

        location_from_payload(&data)
    }
}

/// Pull the location text out of a GraphQL response body.
fn location_from_payload(data: &Value) -> Result<String, LookupError> {
    let result = data
        .pointer("/data/user_result_by_screen_name/result")
        .filter(|v| !v.is_null())
        .ok_or(LookupError::UserNotFound)?;

    Ok(result
        .pointer("/about_profile/account_based_in")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}
