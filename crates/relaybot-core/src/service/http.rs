use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::channel::line::{self, LineClient, LineEvent};
use crate::channel::MessagingApi;
use crate::config::Config;
use crate::dispatch::EventDispatcher;
use crate::error::{ProviderError, Result, WebhookError};
use crate::provider::openai_compat::OpenAiCompatProvider;
use crate::provider::LlmProvider;
use crate::reply::ReplyGenerator;
use crate::types::InboundEvent;

/// Shared application state for the webhook server.
pub struct AppState {
    channel_secret: String,
    dispatcher: EventDispatcher,
}

impl AppState {
    pub fn new(channel_secret: impl Into<String>, dispatcher: EventDispatcher) -> Self {
        Self {
            channel_secret: channel_secret.into(),
            dispatcher,
        }
    }

    /// Build the LINE client, model provider and dispatcher from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let client = crate::util::http::build_client(Duration::from_secs(
            config.provider.timeout_secs,
        ))
        .map_err(ProviderError::from)?;

        let messenger: Arc<dyn MessagingApi> = Arc::new(LineClient::new(
            client.clone(),
            config.line.channel_access_token.clone(),
            &config.line.api_base,
        ));
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(
            client,
            config.provider.api_key.clone(),
            &config.provider.api_base,
        ));
        let generator = ReplyGenerator::new(provider, config.generation_params());

        Ok(Self::new(
            config.line.channel_secret.clone(),
            EventDispatcher::new(messenger, generator),
        ))
    }

    /// Verify the signature and decode the typed events of a webhook body.
    pub fn verify_and_parse(
        &self,
        signature: Option<&str>,
        body: &str,
    ) -> std::result::Result<Vec<InboundEvent>, WebhookError> {
        let signature = signature.ok_or(WebhookError::InvalidSignature)?;
        if !line::verify_signature(&self.channel_secret, body.as_bytes(), signature) {
            return Err(WebhookError::InvalidSignature);
        }
        let events = line::parse_webhook_events(body)?
            .into_iter()
            .filter_map(LineEvent::into_inbound)
            .collect();
        Ok(events)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create the axum Router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(handle_callback))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /callback: LINE webhook
async fn handle_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!("Request body: {}", body);

    let signature = headers
        .get(line::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let events = match state.verify_and_parse(signature, &body) {
        Ok(events) => events,
        Err(WebhookError::InvalidSignature) => {
            warn!("Rejected webhook with invalid signature");
            return (StatusCode::BAD_REQUEST, "Invalid signature");
        }
        Err(e) => {
            error!("Failed to parse LINE webhook: {}", e);
            return (StatusCode::OK, "OK");
        }
    };

    state.dispatcher.dispatch(events).await;
    (StatusCode::OK, "OK")
}

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Bind `addr` and serve webhooks until the process exits.
pub async fn serve(addr: &str, state: Arc<AppState>) -> Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::collections::HashSet;
    use tower::ServiceExt;

    use crate::dispatch::tests::RecordingMessenger;
    use crate::dispatch::DELIVERY_FAILED_TEXT;
    use crate::reply::tests::{params, FakeProvider};

    const SECRET: &str = "channel-secret";

    fn app(messenger: Arc<RecordingMessenger>, provider: FakeProvider) -> Router {
        let generator = ReplyGenerator::new(Arc::new(provider), params());
        let state = AppState::new(SECRET, EventDispatcher::new(messenger, generator));
        create_router(Arc::new(state))
    }

    fn callback(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/callback")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            req = req.header("X-Line-Signature", sig);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn text_payload(token: &str, text: &str) -> String {
        serde_json::json!({
            "destination": "Ubot",
            "events": [{
                "type": "message",
                "replyToken": token,
                "source": { "type": "user", "userId": "U1" },
                "message": { "id": "m1", "type": "text", "text": text }
            }]
        })
        .to_string()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_text_message_replies_and_returns_ok() {
        let messenger = Arc::new(RecordingMessenger::default());
        let body = text_payload("r1", "hello");
        let sig = line::sign(SECRET, body.as_bytes());

        let resp = app(messenger.clone(), FakeProvider::answering("Hi。"))
            .oneshot(callback(&body, Some(sig.as_str())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");
        assert_eq!(messenger.replies(), vec![("r1".to_string(), "Hi".to_string())]);
    }

    #[tokio::test]
    async fn test_invalid_signature_returns_400_without_reply() {
        let messenger = Arc::new(RecordingMessenger::default());
        let provider = FakeProvider::answering("Hi");
        let body = text_payload("r1", "hello");
        let sig = line::sign("wrong-secret", body.as_bytes());

        let resp = app(messenger.clone(), provider)
            .oneshot(callback(&body, Some(sig.as_str())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_returns_400() {
        let messenger = Arc::new(RecordingMessenger::default());
        let resp = app(messenger.clone(), FakeProvider::answering("Hi"))
            .oneshot(callback(&text_payload("r1", "hello"), None))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test]
    async fn test_signed_non_json_body_returns_ok_without_reply() {
        let messenger = Arc::new(RecordingMessenger::default());
        let body = "not json";
        let sig = line::sign(SECRET, body.as_bytes());

        let resp = app(messenger.clone(), FakeProvider::answering("Hi"))
            .oneshot(callback(body, Some(sig.as_str())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_event_does_not_block_batch() {
        let messenger = Arc::new(RecordingMessenger::default());
        let body = serde_json::json!({
            "events": [
                {
                    "type": "message",
                    "replyToken": "r1",
                    "source": { "type": "user", "userId": "U1" },
                    "message": { "id": "m1", "type": "text", "text": "first" }
                },
                {
                    "type": "message",
                    "replyToken": "r2",
                    "source": { "type": "user", "userId": "U1" },
                    "message": { "id": "m2", "type": "text", "text": "second" },
                    "timestamp": "not-a-number"
                }
            ]
        })
        .to_string();
        let sig = line::sign(SECRET, body.as_bytes());

        let resp = app(messenger.clone(), FakeProvider::answering("Hi"))
            .oneshot(callback(&body, Some(sig.as_str())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(messenger.replies(), vec![("r1".to_string(), "Hi".to_string())]);
    }

    #[tokio::test]
    async fn test_delivery_failures_still_return_ok() {
        let messenger = Arc::new(RecordingMessenger {
            reject_texts: HashSet::from(["Hi".to_string(), DELIVERY_FAILED_TEXT.to_string()]),
            ..Default::default()
        });
        let body = text_payload("r1", "hello");
        let sig = line::sign(SECRET, body.as_bytes());

        let resp = app(messenger.clone(), FakeProvider::answering("Hi"))
            .oneshot(callback(&body, Some(sig.as_str())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");
        assert!(messenger.replies().is_empty());
    }

    #[tokio::test]
    async fn test_batch_with_postback_and_join() {
        let messenger = Arc::new(RecordingMessenger::default());
        let body = serde_json::json!({
            "events": [
                {
                    "type": "postback",
                    "replyToken": "r1",
                    "source": { "type": "user", "userId": "U1" },
                    "postback": { "data": "action=buy" }
                },
                {
                    "type": "memberJoined",
                    "replyToken": "r2",
                    "source": { "type": "group", "groupId": "C1" },
                    "joined": { "members": [{ "type": "user", "userId": "U9" }] }
                },
                { "type": "follow", "replyToken": "r3", "source": { "type": "user", "userId": "U2" } }
            ]
        })
        .to_string();
        let sig = line::sign(SECRET, body.as_bytes());

        let resp = app(messenger.clone(), FakeProvider::answering("unused"))
            .oneshot(callback(&body, Some(sig.as_str())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            messenger.replies(),
            vec![("r2".to_string(), "name-of-U9歡迎加入".to_string())]
        );
    }

    #[tokio::test]
    async fn test_health() {
        let messenger = Arc::new(RecordingMessenger::default());
        let resp = app(messenger, FakeProvider::answering("unused"))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_from_config_requires_secrets() {
        let err = AppState::from_config(&Config::default()).err().unwrap();
        assert!(matches!(err, crate::error::RelayError::Config(_)));
    }

    #[tokio::test]
    async fn test_from_config_end_to_end() {
        let mut line_api = mockito::Server::new_async().await;
        let reply = line_api
            .mock("POST", "/v2/bot/message/reply")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "replyToken": "r1",
                "messages": [{ "type": "text", "text": "HelloWorld" }]
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut model_api = mockito::Server::new_async().await;
        let _completion = model_api
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hello。World。"}}]}"#)
            .create_async()
            .await;

        let mut config = Config::default();
        config.line.channel_secret = SECRET.to_string();
        config.line.channel_access_token = "access-token".to_string();
        config.line.api_base = line_api.url();
        config.provider.api_key = "nvapi-test".to_string();
        config.provider.api_base = model_api.url();

        let router = create_router(Arc::new(AppState::from_config(&config).unwrap()));
        let body = text_payload("r1", "hello");
        let sig = line::sign(SECRET, body.as_bytes());
        let resp = router.oneshot(callback(&body, Some(sig.as_str()))).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        reply.assert_async().await;
    }
}
