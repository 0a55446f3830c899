//! Notification sinks.

use async_trait::async_trait;
use buildq_config::NotifyConfig;
use buildq_core::{Error, Notification, Notifier, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Build the notifier described by the configuration.
pub fn notifier_from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    match &config.sendmail {
        Some(program) => Arc::new(SendmailNotifier::new(program.clone(), config.from.clone())),
        None => Arc::new(LogNotifier),
    }
}

/// Records notifications in the log instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        warn!(
            to = %notification.to_email,
            subject = %notification.subject,
            body = %notification.body,
            "Build failure notification (not delivered, no mailer configured)"
        );
        Ok(())
    }
}

/// Delivers notifications by piping a message to a sendmail-compatible program.
pub struct SendmailNotifier {
    program: PathBuf,
    args: Vec<String>,
    from: String,
}

impl SendmailNotifier {
    pub fn new(program: impl Into<PathBuf>, from: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-t".to_string(), "-oi".to_string()],
            from: from.into(),
        }
    }

    /// Replace the default `-t -oi` arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Render the message handed to sendmail.
    pub fn render(&self, notification: &Notification) -> String {
        format!(
            "From: {from}\r\n\
             To: {to_name} <{to_email}>\r\n\
             Subject: {subject}\r\n\
             Date: {date}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             {body}",
            from = header_value(&self.from),
            to_name = header_value(&notification.to_name),
            to_email = header_value(&notification.to_email),
            subject = header_value(&notification.subject),
            date = chrono::Utc::now().to_rfc2822(),
            body = notification.body,
        )
    }
}

// Header values must stay on one line.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[async_trait]
impl Notifier for SendmailNotifier {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        if notification.to_email.trim().is_empty() {
            return Err(Error::NotificationFailed(format!(
                "no recipient for '{}'",
                notification.subject
            )));
        }

        let message = self.render(notification);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotificationFailed(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::NotificationFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(to = %notification.to_email, subject = %notification.subject, "Sent notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification {
            to_name: "A".to_string(),
            to_email: "a@x.com".to_string(),
            subject: "Build failed for amp_bootstrap/abc123".to_string(),
            body: "error: disk full\n".to_string(),
        }
    }

    #[test]
    fn test_render_message() {
        let notifier = SendmailNotifier::new("/usr/sbin/sendmail", "ci@example.org");
        let message = notifier.render(&notification());

        assert!(message.starts_with("From: ci@example.org\r\nTo: A <a@x.com>\r\n"));
        assert!(message.contains("Subject: Build failed for amp_bootstrap/abc123\r\n"));
        assert!(message.ends_with("\r\n\r\nerror: disk full\n"));
    }

    #[test]
    fn test_header_injection_is_flattened() {
        let notifier = SendmailNotifier::new("/usr/sbin/sendmail", "ci@example.org");
        let mut n = notification();
        n.subject = "oops\r\nBcc: everyone@x.com".to_string();

        let message = notifier.render(&n);
        assert!(!message.contains("\r\nBcc:"));
    }

    #[tokio::test]
    async fn test_sendmail_receives_message() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("mail.txt");
        let notifier = SendmailNotifier::new("sh", "ci@example.org")
            .with_args(vec!["-c".to_string(), format!("cat > '{}'", out.display())]);

        notifier.notify(&notification()).await.unwrap();

        let delivered = std::fs::read_to_string(&out).unwrap();
        assert!(delivered.contains("To: A <a@x.com>"));
        assert!(delivered.contains("error: disk full"));
    }

    #[tokio::test]
    async fn test_sendmail_failure_is_reported() {
        let notifier = SendmailNotifier::new("sh", "ci@example.org")
            .with_args(vec!["-c".to_string(), "cat > /dev/null; exit 75".to_string()]);

        let result = notifier.notify(&notification()).await;
        assert!(matches!(result, Err(Error::NotificationFailed(_))));
    }

    #[tokio::test]
    async fn test_missing_recipient_is_rejected() {
        let notifier = SendmailNotifier::new("sh", "ci@example.org");
        let mut n = notification();
        n.to_email = String::new();
        assert!(matches!(
            notifier.notify(&n).await,
            Err(Error::NotificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_everything() {
        assert!(LogNotifier.notify(&notification()).await.is_ok());
    }
}
