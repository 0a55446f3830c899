//! Trigger events received from Git providers and manual rebuild requests.

use serde::{Deserialize, Serialize};

use crate::JobDescriptor;

/// Commit id recorded for manual rebuilds, which do not name a commit.
pub const MANUAL_COMMIT_ID: &str = "HEAD";

/// Kind of trigger event, taken from the `X-GitHub-Event` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Ping,
    Push,
    Rebuild,
    Other(String),
}

impl EventKind {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("ping") => EventKind::Ping,
            Some("push") => EventKind::Push,
            Some("rebuild") => EventKind::Rebuild,
            Some(other) => EventKind::Other(other.to_string()),
            None => EventKind::Other("unknown".to_string()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Ping => write!(f, "ping"),
            EventKind::Push => write!(f, "push"),
            EventKind::Rebuild => write!(f, "rebuild"),
            EventKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A push, either from a provider webhook or a manual rebuild request.
///
/// Both shapes carry `ref`, `repository.name` and `pusher.{name,email}`.
/// Provider pushes also carry the new head commit in `after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub git_ref: String,
    pub repository: String,
    pub after: Option<String>,
    pub pusher_name: String,
    pub pusher_email: String,
}

impl PushEvent {
    /// Parse a push or manual rebuild payload.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let git_ref = payload.get("ref")?.as_str()?.to_string();
        let repository = payload.get("repository")?.get("name")?.as_str()?.to_string();

        let after = payload
            .get("after")
            .and_then(|a| a.as_str())
            .filter(|a| !a.is_empty())
            .map(|a| a.to_string());

        let pusher = payload.get("pusher");
        let pusher_name = pusher
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();
        let pusher_email = pusher
            .and_then(|p| p.get("email"))
            .and_then(|e| e.as_str())
            .unwrap_or("")
            .to_string();

        Some(PushEvent {
            git_ref,
            repository,
            after,
            pusher_name,
            pusher_email,
        })
    }

    /// Payload for a manual rebuild request.
    pub fn manual_payload(
        repository: &str,
        git_ref: &str,
        name: &str,
        email: &str,
    ) -> serde_json::Value {
        serde_json::json!({
            "ref": git_ref,
            "repository": { "name": repository },
            "pusher": { "name": name, "email": email },
        })
    }

    pub fn is_manual(&self) -> bool {
        self.after.is_none()
    }

    /// True for pushes that delete the ref.
    pub fn is_deletion(&self) -> bool {
        self.after
            .as_deref()
            .is_some_and(|a| a.chars().all(|c| c == '0'))
    }

    pub fn commit_id(&self) -> &str {
        self.after.as_deref().unwrap_or(MANUAL_COMMIT_ID)
    }

    /// Job descriptor for building `repository` because of this push.
    pub fn job_for(&self, repository: &str) -> JobDescriptor {
        JobDescriptor::new(
            repository,
            &self.git_ref,
            self.commit_id(),
            &self.pusher_name,
            &self.pusher_email,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_github_push() {
        let payload = json!({
            "ref": "refs/heads/master",
            "before": "0123",
            "after": "abc123",
            "repository": { "name": "amp_mgms", "full_name": "org/amp_mgms" },
            "pusher": { "name": "A", "email": "a@x.com" },
            "sender": { "login": "a" }
        });

        let event = PushEvent::from_payload(&payload).unwrap();
        assert_eq!(event.repository, "amp_mgms");
        assert_eq!(event.commit_id(), "abc123");
        assert!(!event.is_manual());

        let job = event.job_for("amp_mgms");
        assert_eq!(job.git_ref, "refs/heads/master");
        assert_eq!(job.branch(), "main");
        assert_eq!(job.committer_email, "a@x.com");
    }

    #[test]
    fn test_parse_manual_rebuild() {
        let payload =
            PushEvent::manual_payload("amp_ui", "refs/heads/main", "Manual Trigger", "ci@x.org");
        let event = PushEvent::from_payload(&payload).unwrap();
        assert!(event.is_manual());
        assert_eq!(event.commit_id(), MANUAL_COMMIT_ID);
        assert_eq!(event.pusher_name, "Manual Trigger");
    }

    #[test]
    fn test_deletion_detected() {
        let payload = json!({
            "ref": "refs/heads/old",
            "after": "0000000000000000000000000000000000000000",
            "repository": { "name": "r" },
            "pusher": { "name": "A", "email": "a@x.com" }
        });
        assert!(PushEvent::from_payload(&payload).unwrap().is_deletion());
    }

    #[test]
    fn test_missing_repository_is_rejected() {
        let payload = json!({ "ref": "refs/heads/main", "pusher": { "name": "A" } });
        assert!(PushEvent::from_payload(&payload).is_none());
    }

    #[test]
    fn test_event_kind_from_header() {
        assert_eq!(EventKind::from_header(Some("ping")), EventKind::Ping);
        assert_eq!(EventKind::from_header(Some("Push")), EventKind::Push);
        assert_eq!(EventKind::from_header(Some("rebuild")), EventKind::Rebuild);
        assert_eq!(
            EventKind::from_header(Some("issues")),
            EventKind::Other("issues".to_string())
        );
        assert_eq!(
            EventKind::from_header(None),
            EventKind::Other("unknown".to_string())
        );
    }
}
