//! GitHub webhook payloads and signatures.

use agent::core::types::{RepoId, RepoIdError};
use agent::orchestrator::RunRequest;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check `X-Hub-Signature-256` (`sha256=<hex>`) against the raw body.
pub fn verify_signature(secret: &[u8], body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|value| value.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// `sha256=<hex>` signature for `body`.
#[cfg(test)]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Issue event extracted from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub event_type: String,
    pub action: String,
    pub issue_title: String,
    pub issue_description: String,
    pub repo_id: String,
    /// The issue is a pull request (comment events only).
    pub on_pull_request: bool,
}

impl TriggerEvent {
    /// Returns `None` for payloads without an issue and a repository.
    pub fn from_payload(event_type: &str, payload: &Value) -> Option<Self> {
        let issue = payload.get("issue")?;
        let repo_id = payload
            .pointer("/repository/full_name")
            .and_then(Value::as_str)?;
        let issue_title = issue.get("title").and_then(Value::as_str).unwrap_or_default();
        let issue_body = issue.get("body").and_then(Value::as_str).unwrap_or_default();
        let issue_description = match payload.pointer("/comment/body").and_then(Value::as_str) {
            Some(comment) if event_type == "issue_comment" && issue_body.trim().is_empty() => {
                format!("Comment: {comment}")
            }
            Some(comment) if event_type == "issue_comment" => {
                format!("{issue_body}\n\nComment: {comment}")
            }
            _ => issue_body.to_string(),
        };
        Some(Self {
            event_type: event_type.to_string(),
            action: payload
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            issue_title: issue_title.to_string(),
            issue_description,
            repo_id: repo_id.to_string(),
            on_pull_request: issue.get("pull_request").is_some(),
        })
    }

    /// Opened issues and new comments on issues start a run.
    pub fn is_actionable(&self) -> bool {
        let relevant = matches!(
            (self.event_type.as_str(), self.action.as_str()),
            ("issues", "opened") | ("issue_comment", "created")
        );
        relevant && !self.on_pull_request && !self.issue_title.trim().is_empty()
    }

    pub fn to_request(&self) -> Result<RunRequest, RepoIdError> {
        Ok(RunRequest {
            repo: RepoId::parse(&self.repo_id)?,
            issue_title: self.issue_title.clone(),
            issue_description: self.issue_description.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn signature_round_trip_and_rejections() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let header = sign(b"s3cret", body);

        assert!(verify_signature(b"s3cret", body, Some(&header)));
        assert!(!verify_signature(b"other", body, Some(&header)));
        assert!(!verify_signature(b"s3cret", b"{}", Some(&header)));
        assert!(!verify_signature(b"s3cret", body, Some("sha256=zz")));
        assert!(!verify_signature(b"s3cret", body, Some("sha1=abc")));
        assert!(!verify_signature(b"s3cret", body, None));
    }

    #[test]
    fn opened_issue_becomes_request() {
        let payload = json!({
            "action": "opened",
            "issue": {"title": "Fix bug", "body": "Crash on start"},
            "repository": {"full_name": "acme/widgets"}
        });

        let event = TriggerEvent::from_payload("issues", &payload).expect("event");

        assert!(event.is_actionable());
        let request = event.to_request().expect("request");
        assert_eq!(request.repo.to_string(), "acme/widgets");
        assert_eq!(request.issue_title, "Fix bug");
        assert_eq!(request.issue_description, "Crash on start");
    }

    #[test]
    fn comment_appends_to_description_and_ignores_pull_requests() {
        let mut payload = json!({
            "action": "created",
            "issue": {"title": "Fix bug", "body": null},
            "comment": {"body": "Still failing on 1.2"},
            "repository": {"full_name": "acme/widgets"}
        });

        let event = TriggerEvent::from_payload("issue_comment", &payload).expect("event");
        assert!(event.is_actionable());
        assert_eq!(event.issue_description, "Comment: Still failing on 1.2");

        payload["issue"]["pull_request"] = json!({"url": "https://api.github.com/x"});
        let event = TriggerEvent::from_payload("issue_comment", &payload).expect("event");
        assert!(!event.is_actionable());
    }

    #[test]
    fn other_actions_are_not_actionable() {
        let payload = json!({
            "action": "closed",
            "issue": {"title": "Fix bug"},
            "repository": {"full_name": "acme/widgets"}
        });
        let event = TriggerEvent::from_payload("issues", &payload).expect("event");
        assert!(!event.is_actionable());
        assert!(TriggerEvent::from_payload("push", &json!({"ref": "refs/heads/main"})).is_none());
    }
}
