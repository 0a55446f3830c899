//! Placeholder substitution for build script fragments.
//!
//! Fragments are plain shell text containing placeholders such as
//! `{repository}` or `{commit_id}`. Substitution is literal: a placeholder
//! whose name is a known variable is replaced by its value, everything else
//! (including shell `${VAR}` expansions of unknown names) is left untouched.

use buildq_core::JobDescriptor;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

// Regex for matching {name} placeholders
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// Variables available to fragment templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables for a job: every descriptor field under its serialized name.
    pub fn from_job(job: &JobDescriptor) -> Self {
        Self { vars: job.fields() }
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Substitute every known placeholder in `input`.
    pub fn interpolate(&self, input: &str) -> String {
        PLACEHOLDER_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let name = &caps[1];
                self.get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }

    /// Placeholders in `input` that have no value, in first-seen order.
    ///
    /// Shell expansions (`${NAME}`) are not placeholders and are skipped.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in PLACEHOLDER_REGEX.captures_iter(input) {
            let start = caps.get(0).map_or(0, |m| m.start());
            if input[..start].ends_with('$') {
                continue;
            }
            let name = &caps[1];
            if !self.vars.contains_key(name) && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobDescriptor {
        JobDescriptor::new("amp_mgms", "refs/heads/main", "abc123", "A", "a@x.com")
    }

    #[test]
    fn test_descriptor_fields_substituted() {
        let vars = TemplateVars::from_job(&job());
        let result = vars.interpolate("git clone $BASE/{repository} && git checkout {commit_id}");
        assert_eq!(result, "git clone $BASE/amp_mgms && git checkout abc123");
    }

    #[test]
    fn test_ref_placeholder() {
        let vars = TemplateVars::from_job(&job());
        assert_eq!(vars.interpolate("echo {ref}"), "echo refs/heads/main");
    }

    #[test]
    fn test_unknown_placeholder_preserved() {
        let vars = TemplateVars::from_job(&job());
        let result = vars.interpolate("echo ${HOME} {unknown} {repository}");
        assert_eq!(result, "echo ${HOME} {unknown} amp_mgms");
    }

    #[test]
    fn test_shell_braces_untouched() {
        let vars = TemplateVars::from_job(&job());
        let script = "if [ -d x ]; then { echo a; }; fi\nawk '{print $1}'";
        assert_eq!(vars.interpolate(script), script);
    }

    #[test]
    fn test_values_are_not_reinterpolated() {
        let mut vars = TemplateVars::new();
        vars.set("a", "{b}");
        vars.set("b", "oops");
        assert_eq!(vars.interpolate("{a}"), "{b}");
    }

    #[test]
    fn test_unresolved() {
        let vars = TemplateVars::from_job(&job());
        let missing = vars.unresolved("{repository} {branch_name} {HOME} {branch_name}");
        assert_eq!(missing, vec!["branch_name", "HOME"]);
    }

    #[test]
    fn test_unresolved_skips_shell_expansions() {
        let vars = TemplateVars::from_job(&job());
        assert!(vars.unresolved("cd ${HOME}/{repository}").is_empty());
    }
}
