//! iPhoto Notify - Pushover delivery adapter
//!
//! Implements the [`INotifier`](iphoto_core::ports::INotifier) port against
//! the Pushover message API. Delivery is bounded by a 10-second timeout and
//! never retried here; retry policy belongs to callers (and the engine
//! deliberately has none).
//!
//! Secret hygiene: the API token and user key travel only in the request
//! body. They are never logged and never appear in error messages.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use iphoto_core::config::PushoverConfig;
use iphoto_core::ports::notifier::{INotifier, NotifyError, NotifyKind};

/// Pushover message endpoint
const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Upper bound on one delivery attempt
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pushover implementation of the notifier port
pub struct PushoverNotifier {
    http: Client,
    api_url: String,
    api_token: String,
    user_key: String,
    device: Option<String>,
}

impl PushoverNotifier {
    /// Creates a notifier from the validated configuration section.
    pub fn new(config: &PushoverConfig) -> Self {
        Self::with_api_url(config, PUSHOVER_API_URL)
    }

    /// Creates a notifier pointed at a custom endpoint (tests).
    pub fn with_api_url(config: &PushoverConfig, api_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_url: api_url.into(),
            api_token: config.api_token.clone(),
            user_key: config.user_key.clone(),
            device: config.device.clone(),
        }
    }

    /// Pushover priority for a message kind.
    ///
    /// `-1` quiet, `0` normal, `1` high (bypasses quiet hours). Priority 2
    /// would demand acknowledgement parameters, which a sync daemon has no
    /// business requiring.
    fn priority(kind: NotifyKind) -> i8 {
        match kind {
            NotifyKind::Info => 0,
            NotifyKind::AuthRequired => 1,
            NotifyKind::AuthSuccess => 0,
            NotifyKind::Fatal => 1,
        }
    }
}

#[async_trait::async_trait]
impl INotifier for PushoverNotifier {
    async fn notify(
        &self,
        kind: NotifyKind,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<(), NotifyError> {
        let priority = Self::priority(kind).to_string();
        let mut form: Vec<(&str, &str)> = vec![
            ("token", self.api_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", title),
            ("message", body),
            ("priority", priority.as_str()),
        ];
        if let Some(url) = url {
            form.push(("url", url));
        }
        if let Some(ref device) = self.device {
            form.push(("device", device.as_str()));
        }

        let response = self
            .http
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors carry the URL, never the form body, so no
                // token material can leak through this message.
                NotifyError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(kind = %kind, status = status.as_u16(), "Pushover rejected the message");
            return Err(NotifyError::Upstream {
                status: status.as_u16(),
            });
        }

        debug!(kind = %kind, title, "Notification delivered");
        Ok(())
    }
}
