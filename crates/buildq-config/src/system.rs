//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the webhook secret from the file.
pub const SECRET_ENV: &str = "BUILDQ_WEBHOOK_SECRET";

/// Default request body ceiling for the webhook endpoint.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_000_000;

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Directory holding queued job files.
    pub queue_dir: PathBuf,
    /// Process lock marker file.
    pub lock_file: PathBuf,
    /// Directory holding `<phase>_<branch>` fragment files.
    pub scripts_dir: PathBuf,
    /// Candidate scratch roots; the first that exists is used.
    pub scratch_roots: Vec<PathBuf>,
    /// Number of builds allowed to run at once.
    pub workers: usize,
    /// Interval between queue scans while builds are in flight.
    pub poll_interval: Duration,
    /// Never run two builds of the same repository at once.
    pub serialize_repositories: bool,
    /// Repository whose pushes rebuild every configured repository.
    pub bootstrap_repository: Option<String>,
    /// Repositories that are built when pushed to.
    pub repositories: Vec<String>,
    pub server: ServerConfig,
    pub notify: NotifyConfig,
}

/// Webhook server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret for webhook signatures.
    pub secret: Option<String>,
    /// Reject webhook requests that carry no signature.
    pub require_signature: bool,
    pub max_body_bytes: usize,
    /// Run the orchestrator in the server process after each enqueue.
    pub autorun: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            secret: None,
            require_signature: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            autorun: true,
        }
    }
}

/// Failure notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Sender address for failure mail.
    pub from: String,
    /// Path to a sendmail-compatible binary. Notifications are only logged when unset.
    pub sendmail: Option<PathBuf>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            from: "buildq@localhost".to_string(),
            sendmail: None,
        }
    }
}

impl SystemConfig {
    /// Whether pushes to `repository` produce builds.
    pub fn is_known_repository(&self, repository: &str) -> bool {
        self.repositories.iter().any(|r| r == repository)
    }

    /// Repositories to build for a push to `repository`.
    ///
    /// The bootstrap repository fans out to every configured repository;
    /// unknown repositories build nothing.
    pub fn build_targets(&self, repository: &str) -> Vec<String> {
        if self.bootstrap_repository.as_deref() == Some(repository) {
            self.repositories.clone()
        } else if self.is_known_repository(repository) {
            vec![repository.to_string()]
        } else {
            Vec::new()
        }
    }

    /// Resolve relative paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.queue_dir);
        resolve(&mut self.lock_file);
        resolve(&mut self.scripts_dir);
        self.scratch_roots.iter_mut().for_each(resolve);
        // A bare program name is looked up on PATH.
        if let Some(sendmail) = self.notify.sendmail.as_mut() {
            if sendmail.components().count() > 1 {
                resolve(sendmail);
            }
        }
    }

    fn check(&self) -> ConfigResult<()> {
        if self.server.require_signature && self.server.secret.is_none() {
            return Err(ConfigError::MissingField(format!(
                "server secret (required by require-signature; set it or {})",
                SECRET_ENV
            )));
        }
        Ok(())
    }
}

/// Read and parse a configuration file.
///
/// Relative paths are resolved against the file's directory, and
/// `BUILDQ_WEBHOOK_SECRET` overrides any secret in the file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    load_with_secret(path.as_ref(), std::env::var(SECRET_ENV).ok())
}

fn load_with_secret(path: &Path, secret: Option<String>) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_unchecked(&content)?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    config.resolve_paths(base);

    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        config.server.secret = Some(secret);
    }

    config.check()?;
    Ok(config)
}

/// Parse system configuration from KDL text.
///
/// The text alone must be complete: a `require-signature` server needs its
/// `secret` in the document.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let config = parse_unchecked(kdl)?;
    config.check()?;
    Ok(config)
}

fn parse_unchecked(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut queue_dir = None;
    let mut lock_file = None;
    let mut scripts_dir = None;
    let mut scratch_roots = Vec::new();
    let mut workers = 1;
    let mut poll_interval = Duration::from_secs(10);
    let mut serialize_repositories = true;
    let mut bootstrap_repository = None;
    let mut repositories: Vec<String> = Vec::new();
    let mut server = ServerConfig::default();
    let mut notify = NotifyConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "queue" => queue_dir = Some(PathBuf::from(required_string(node, "queue")?)),
            "lock-file" => lock_file = Some(PathBuf::from(required_string(node, "lock-file")?)),
            "scripts" => scripts_dir = Some(PathBuf::from(required_string(node, "scripts")?)),
            "scratch" => {
                scratch_roots.extend(get_all_string_args(node).into_iter().map(PathBuf::from));
            }
            "workers" => {
                let n = required_int(node, "workers")?;
                workers = usize::try_from(n)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("workers", format!("must be at least 1, got {}", n)))?;
            }
            "poll-interval" => {
                let secs = required_int(node, "poll-interval")?;
                let secs = u64::try_from(secs).ok().filter(|s| *s > 0).ok_or_else(|| {
                    invalid("poll-interval", format!("must be positive, got {}", secs))
                })?;
                poll_interval = Duration::from_secs(secs);
            }
            "serialize-repositories" => {
                serialize_repositories = required_bool(node, "serialize-repositories")?;
            }
            "bootstrap" => bootstrap_repository = Some(required_string(node, "bootstrap")?),
            "repositories" => {
                for repo in get_all_string_args(node) {
                    if repositories.contains(&repo) {
                        return Err(ConfigError::Duplicate(repo.to_string()));
                    }
                    repositories.push(repo);
                }
            }
            "server" => server = parse_server(node)?,
            "notify" => notify = parse_notify(node)?,
            _ => {} // Ignore unknown nodes
        }
    }

    let queue_dir = queue_dir.ok_or_else(|| ConfigError::MissingField("queue".to_string()))?;
    let scripts_dir =
        scripts_dir.ok_or_else(|| ConfigError::MissingField("scripts".to_string()))?;
    let lock_file = lock_file.unwrap_or_else(|| queue_dir.join("lock"));

    if scratch_roots.is_empty() {
        scratch_roots.push(PathBuf::from("/srv/scratch"));
    }

    if let Some(bootstrap) = &bootstrap_repository {
        if bootstrap.is_empty() {
            return Err(invalid("bootstrap", "must not be empty"));
        }
    }

    Ok(SystemConfig {
        queue_dir,
        lock_file,
        scripts_dir,
        scratch_roots,
        workers,
        poll_interval,
        serialize_repositories,
        bootstrap_repository,
        repositories,
        server,
        notify,
    })
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerConfig> {
    let mut server = ServerConfig::default();

    if let Some(host) = get_string_prop(node, "host") {
        server.host = host;
    }
    if let Some(port) = node.get("port").and_then(|v| v.as_integer()) {
        server.port = u16::try_from(port)
            .map_err(|_| invalid("server port", format!("out of range: {}", port)))?;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "secret" => server.secret = Some(required_string(child, "server secret")?),
                "require-signature" => {
                    server.require_signature = required_bool(child, "require-signature")?;
                }
                "max-body-bytes" => {
                    let n = required_int(child, "max-body-bytes")?;
                    server.max_body_bytes =
                        usize::try_from(n).ok().filter(|n| *n > 0).ok_or_else(|| {
                            invalid("max-body-bytes", format!("must be positive, got {}", n))
                        })?;
                }
                "autorun" => server.autorun = required_bool(child, "autorun")?,
                _ => {}
            }
        }
    }

    Ok(server)
}

fn parse_notify(node: &KdlNode) -> ConfigResult<NotifyConfig> {
    let mut notify = NotifyConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "from" => notify.from = required_string(child, "notify from")?,
                "sendmail" => {
                    let path = required_string(child, "notify sendmail")?;
                    notify.sendmail = Some(PathBuf::from(path));
                }
                _ => {}
            }
        }
    }

    Ok(notify)
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

// Helper functions for extracting values from KDL nodes

fn required_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn required_int(node: &KdlNode, field: &str) -> ConfigResult<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| invalid(field, "expected an integer"))
}

fn required_bool(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
        .ok_or_else(|| invalid(field, "expected #true or #false"))
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
