//! Privileged lookup bridge.
//!
//! Runs in the context that holds credentials. It answers every
//! `LookupRequest` with exactly one `LookupResponse` carrying the same
//! `requestId`, and keeps no state between calls.

#[cfg(feature = "http")]
pub mod http;
pub mod table;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use geo_filter::AuthorId;

use crate::transport::{Endpoint, MessageSender};
use crate::types::{BridgeMessage, LookupError, LookupRequest, LookupResponse, RuntimeResult};

#[cfg(feature = "http")]
pub use http::HttpLookup;
pub use table::TableLookup;

/// Source of raw account location text.
#[async_trait]
pub trait LookupBackend: Send + Sync + 'static {
    /// Location text for an author. An author without a location yields an
    /// empty string, not an error.
    async fn account_location(&self, author: &AuthorId) -> Result<String, LookupError>;
}

/// Serves lookup requests arriving on an endpoint.
pub struct PrivilegedBridge {
    backend: Arc<dyn LookupBackend>,
}

impl PrivilegedBridge {
    pub fn new(backend: Arc<dyn LookupBackend>) -> Self {
        Self { backend }
    }

    /// Answer a single request.
    pub async fn handle(&self, request: &LookupRequest) -> LookupResponse {
        respond(self.backend.as_ref(), request).await
    }

    /// Serve until the consuming side closes the channel.
    ///
    /// Requests are answered concurrently; responses may therefore arrive in
    /// a different order than the requests were sent.
    pub async fn serve(&self, endpoint: Endpoint) -> RuntimeResult<()> {
        let (sender, mut receiver) = endpoint.split();
        tracing::info!("Lookup bridge serving");

        while let Some(message) = receiver.recv().await {
            match message {
                Ok(BridgeMessage::LookupRequest(request)) => {
                    self.dispatch(request, sender.clone());
                }
                Ok(BridgeMessage::LookupResponse(response)) => {
                    tracing::warn!(
                        "Ignoring LookupResponse {} sent to the bridge",
                        response.request_id
                    );
                }
                Err(e) => tracing::warn!("Dropping malformed bridge message: {e}"),
            }
        }

        tracing::info!("Lookup bridge channel closed, shutting down");
        Ok(())
    }

    /// Serve on a background task.
    pub fn spawn(self, endpoint: Endpoint) -> JoinHandle<RuntimeResult<()>> {
        tokio::spawn(async move { self.serve(endpoint).await })
    }

    fn dispatch(&self, request: LookupRequest, sender: MessageSender) {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let response = respond(backend.as_ref(), &request).await;
            if let Err(e) = sender.send(&BridgeMessage::LookupResponse(response)) {
                tracing::debug!("Could not deliver response {}: {e}", request.request_id);
            }
        });
    }
}

async fn respond(backend: &dyn LookupBackend, request: &LookupRequest) -> LookupResponse {
    match backend.account_location(&request.author_id).await {
        Ok(location) => {
            tracing::debug!("Location for {}: {location:?}", request.author_id);
            LookupResponse::success(request, location)
        }
        Err(e) => {
            tracing::warn!("Error fetching location for {}: {e}", request.author_id);
            LookupResponse::failure(request, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::duplex;

    #[tokio::test]
    async fn test_bridge_echoes_request_id() {
        let backend = TableLookup::from_pairs([("ada", "Lagos, Nigeria")]);
        let bridge = PrivilegedBridge::new(Arc::new(backend));

        let (consumer, privileged) = duplex();
        let handle = bridge.spawn(privileged);
        let (tx, mut rx) = consumer.split();

        tx.send(&BridgeMessage::LookupRequest(LookupRequest {
            request_id: 41,
            author_id: AuthorId::new("ada"),
        }))
        .unwrap();
        tx.send(&BridgeMessage::LookupRequest(LookupRequest {
            request_id: 42,
            author_id: AuthorId::new("ghost"),
        }))
        .unwrap();

        let mut responses = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap().unwrap() {
                BridgeMessage::LookupResponse(resp) => responses.push(resp),
                other => panic!("unexpected {other:?}"),
            }
        }
        responses.sort_by_key(|r| r.request_id);

        assert_eq!(responses[0].request_id, 41);
        assert!(responses[0].success);
        assert_eq!(responses[0].raw_location_text.as_deref(), Some("Lagos, Nigeria"));

        assert_eq!(responses[1].request_id, 42);
        assert!(!responses[1].success);
        assert_eq!(responses[1].error_message.as_deref(), Some("User not found"));

        drop(tx);
        drop(rx);
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_handle_empty_location_is_success() {
        let bridge = PrivilegedBridge::new(Arc::new(TableLookup::from_pairs([("quiet", "")])));
        let request = LookupRequest {
            request_id: 3,
            author_id: AuthorId::new("quiet"),
        };

        let response = tokio_test::block_on(bridge.handle(&request));
        assert!(response.success);
        assert_eq!(response.raw_location_text.as_deref(), Some(""));
        assert_eq!(response.error_message, None);
    }
}
