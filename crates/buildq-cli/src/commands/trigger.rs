//! Manual rebuild command.

use anyhow::{Context, Result, bail};
use buildq_config::{NotifyConfig, ServerConfig, load_system_config};
use buildq_core::event::PushEvent;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::path::Path;

/// Post a manual rebuild request to the webhook server.
pub async fn trigger(
    config_path: &Path,
    repository: &str,
    git_ref: &str,
    url: Option<String>,
    name: &str,
    email: Option<String>,
) -> Result<()> {
    let config = load_system_config(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let url = url.unwrap_or_else(|| webhook_url(&config.server));

    let email = recipient(email, &config.notify);
    let body = PushEvent::manual_payload(repository, git_ref, name, &email).to_string();

    let mut request = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .header("x-github-event", "rebuild");
    if let Some(secret) = &config.server.secret {
        request = request.header("x-hook-signature", sign(secret, body.as_bytes())?);
    }

    let response = request
        .body(body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("Rebuild request failed: ({}) {}", status, text);
    }

    println!("Rebuild requested: {}", text);
    Ok(())
}

/// Webhook URL of the configured server, reachable from this host.
pub fn webhook_url(server: &ServerConfig) -> String {
    let host = match server.host.as_str() {
        "0.0.0.0" => "127.0.0.1",
        "::" => "[::1]",
        host => host,
    };
    format!("http://{}:{}/webhook/", host, server.port)
}

/// Address failure notices for a manual build go to: the given one, else the
/// configured sender.
fn recipient(email: Option<String>, notify: &NotifyConfig) -> String {
    email
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| notify.from.clone())
}

fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid secret: {}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
