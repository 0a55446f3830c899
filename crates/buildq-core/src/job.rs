//! Job descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The data identifying one requested build.
///
/// Serialized as a flat JSON object. Keys beyond the five known fields are
/// preserved in `extra` so newer producers can add fields without breaking
/// older consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit_id: String,
    pub committer_name: String,
    pub committer_email: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl JobDescriptor {
    pub fn new(
        repository: impl Into<String>,
        git_ref: impl Into<String>,
        commit_id: impl Into<String>,
        committer_name: impl Into<String>,
        committer_email: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            git_ref: git_ref.into(),
            commit_id: commit_id.into(),
            committer_name: committer_name.into(),
            committer_email: committer_email.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Branch name used to select build fragments.
    pub fn branch(&self) -> String {
        normalize_ref(&self.git_ref)
    }

    /// All fields as template parameters, keyed by their serialized names.
    ///
    /// Extra string values are passed through verbatim; other JSON values use
    /// their JSON text.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = self
            .extra
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();

        fields.insert("repository".to_string(), self.repository.clone());
        fields.insert("ref".to_string(), self.git_ref.clone());
        fields.insert("commit_id".to_string(), self.commit_id.clone());
        fields.insert("committer_name".to_string(), self.committer_name.clone());
        fields.insert("committer_email".to_string(), self.committer_email.clone());
        fields
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Reduce a git ref to the branch name used in fragment file names.
///
/// Takes the final path segment and maps `master` to `main`.
pub fn normalize_ref(git_ref: &str) -> String {
    let name = git_ref.rsplit('/').next().unwrap_or(git_ref);
    match name {
        "master" => "main".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ref() {
        assert_eq!(normalize_ref("refs/heads/master"), "main");
        assert_eq!(normalize_ref("refs/heads/main"), "main");
        assert_eq!(normalize_ref("refs/heads/feature-x"), "feature-x");
        assert_eq!(normalize_ref("develop"), "develop");
    }

    #[test]
    fn test_parse_wire_format() {
        let json = r#"{
            "repository": "amp_bootstrap",
            "ref": "refs/heads/main",
            "commit_id": "abc123",
            "committer_name": "A",
            "committer_email": "a@x.com"
        }"#;

        let job = JobDescriptor::from_json(json).unwrap();
        assert_eq!(job.repository, "amp_bootstrap");
        assert_eq!(job.git_ref, "refs/heads/main");
        assert_eq!(job.branch(), "main");
        assert!(job.extra.is_empty());
    }

    #[test]
    fn test_extra_keys_are_tolerated_and_kept() {
        let json = r#"{"repository":"r","ref":"refs/heads/dev","commit_id":"c",
            "committer_name":"n","committer_email":"e","priority":3,"origin":"cron"}"#;

        let job = JobDescriptor::from_json(json).unwrap();
        let fields = job.fields();
        assert_eq!(fields["origin"], "cron");
        assert_eq!(fields["priority"], "3");
        assert_eq!(fields["ref"], "refs/heads/dev");

        let reparsed = JobDescriptor::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, job);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let json = r#"{"repository":"r","ref":"refs/heads/dev"}"#;
        assert!(JobDescriptor::from_json(json).is_err());
    }
}
