//! HTTP route handlers for the webhook server.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::webhook::{EVENT_HEADER, SIGNATURE_HEADER, TriggerEvent, verify_signature};

/// Build the router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/webhook", post(webhook))
}

/// GET / - service info.
async fn index() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/", "/health", "/webhook"],
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// POST /webhook - GitHub deliveries.
async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = &state.webhook_secret {
        if !verify_signature(secret.as_bytes(), &body, header(&headers, SIGNATURE_HEADER)) {
            warn!("rejected webhook with invalid signature");
            return reply(StatusCode::UNAUTHORIZED, json!({"error": "invalid signature"}));
        }
    }

    let event_type = header(&headers, EVENT_HEADER).unwrap_or_default();
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(error = %err, "webhook body is not JSON");
            return reply(StatusCode::BAD_REQUEST, json!({"error": "invalid JSON payload"}));
        }
    };

    if event_type == "ping" {
        return reply(StatusCode::OK, json!({"message": "pong"}));
    }

    let Some(trigger) = TriggerEvent::from_payload(event_type, &payload)
        .filter(TriggerEvent::is_actionable)
    else {
        debug!(event_type, "ignoring webhook event");
        return reply(StatusCode::OK, json!({"status": "received"}));
    };

    let request = match trigger.to_request() {
        Ok(request) if state.allows(&request.repo) => request,
        Ok(request) => {
            info!(repo = %request.repo, "ignoring event for repository outside the allow-list");
            return reply(StatusCode::OK, json!({"status": "received"}));
        }
        Err(err) => {
            warn!(error = %err, "webhook carried an invalid repository");
            return reply(StatusCode::OK, json!({"status": "received"}));
        }
    };

    let branch = state.working_branch(&request);
    info!(
        repo = %request.repo,
        event_type,
        action = %trigger.action,
        branch = %branch,
        "starting agent run"
    );
    state.spawn_run(request);
    reply(
        StatusCode::ACCEPTED,
        json!({"status": "processed", "branch": branch}),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent::io::config::AgentConfig;
    use agent::io::run_store::InMemoryRunStore;
    use agent::test_support::{FakeHost, ScriptedModel, text_reply};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::webhook::sign;

    fn app(secret: Option<&str>, repositories: &[&str]) -> Router {
        let mut config = AgentConfig::default();
        config.server.repositories = repositories.iter().map(|r| r.to_string()).collect();
        let state = AppState::new(
            config,
            Arc::new(ScriptedModel::new(vec![text_reply("done")])),
            Arc::new(FakeHost::new("main")),
            Arc::new(InMemoryRunStore::new()),
            secret.map(str::to_string),
        );
        router().with_state(state)
    }

    fn delivery(event: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(EVENT_HEADER, event);
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn opened_issue(repo: &str) -> String {
        json!({
            "action": "opened",
            "issue": {"title": "Fix bug", "body": "Crash on start"},
            "repository": {"full_name": repo}
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_and_index() {
        let request = Request::get("/health").body(Body::empty()).expect("request");
        let (status, body) = send(app(None, &[]), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        let request = Request::get("/").body(Body::empty()).expect("request");
        let (_, body) = send(app(None, &[]), request).await;
        assert_eq!(body["name"], "agent-server");
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let (status, body) = send(app(None, &[]), delivery("ping", r#"{"zen":"hi"}"#, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "pong"}));
    }

    #[tokio::test]
    async fn opened_issue_starts_a_run() {
        let (status, body) = send(
            app(None, &["acme/widgets"]),
            delivery("issues", &opened_issue("acme/widgets"), None),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({"status": "processed", "branch": "agent/fix-fix-bug"}));
    }

    #[tokio::test]
    async fn repository_outside_allow_list_is_only_received() {
        let (status, body) = send(
            app(None, &["acme/widgets"]),
            delivery("issues", &opened_issue("acme/gadgets"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "received"}));
    }

    #[tokio::test]
    async fn other_events_are_only_received() {
        let body = json!({
            "action": "closed",
            "issue": {"title": "Fix bug"},
            "repository": {"full_name": "acme/widgets"}
        })
        .to_string();
        let (status, reply) = send(app(None, &[]), delivery("issues", &body, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, json!({"status": "received"}));
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let (status, _) = send(app(None, &[]), delivery("issues", "{not json", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signatures_are_enforced_when_a_secret_is_set() {
        let body = opened_issue("acme/widgets");

        let (status, _) = send(app(Some("s3cret"), &[]), delivery("issues", &body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = sign(b"wrong", body.as_bytes());
        let (status, _) =
            send(app(Some("s3cret"), &[]), delivery("issues", &body, Some(forged))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let signed = sign(b"s3cret", body.as_bytes());
        let (status, _) =
            send(app(Some("s3cret"), &[]), delivery("issues", &body, Some(signed))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
