use std::time::Duration;

use culler_core::error::AppError;
use culler_core::progress::ObserverEvent;
use culler_core::traits::ObserverChannel;
use reqwest::Client;
use url::Url;

/// Observer that POSTs every event as JSON to a webhook.
///
/// Delivery is best-effort: callers swallow failures, so a missing or
/// slow receiver never affects a run.
#[derive(Clone)]
pub struct WebhookObserver {
    client: Client,
    url: Url,
}

impl WebhookObserver {
    pub fn new(url: &str) -> Result<Self, AppError> {
        Self::with_timeout(url, Duration::from_secs(5))
    }

    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self, AppError> {
        let url = validate_url(url)?;
        let client = Client::builder()
            .user_agent("Culler/0.3 (observer)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ObserverChannel for WebhookObserver {
    async fn send(&self, event: &ObserverEvent) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    AppError::HostDisconnected(format!("Webhook unreachable: {e}"))
                } else {
                    AppError::HostError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HostError(format!(
                "Webhook returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

fn validate_url(url: &str) -> Result<Url, AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ConfigError(format!("Invalid webhook URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::ConfigError(format!(
                "Webhook scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(AppError::ConfigError("Webhook URL has no host".into()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_urls() {
        let observer = WebhookObserver::new("http://127.0.0.1:9000/events").unwrap();
        assert_eq!(observer.url().path(), "/events");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            WebhookObserver::new("file:///tmp/events"),
            Err(AppError::ConfigError(_))
        ));
        assert!(WebhookObserver::new("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_receiver_is_a_disconnect() {
        // Port 9 (discard) is closed on test hosts.
        let observer =
            WebhookObserver::with_timeout("http://127.0.0.1:9/events", Duration::from_secs(2))
                .unwrap();
        let err = observer
            .send(&ObserverEvent::Completed { unfollowed: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HostDisconnected(_)));
    }
}
