use tokio::sync::broadcast;

use culler_client::WebhookObserver;
use culler_core::error::AppError;
use culler_core::progress::ObserverEvent;
use culler_core::traits::ObserverChannel;

/// Events buffered per SSE subscriber before it starts lagging.
pub const EVENT_BUFFER: usize = 256;

/// Observer that fans events out to SSE subscribers and, if configured,
/// a webhook.
#[derive(Clone)]
pub struct ServerObserver {
    events: broadcast::Sender<ObserverEvent>,
    webhook: Option<WebhookObserver>,
}

impl ServerObserver {
    pub fn new(events: broadcast::Sender<ObserverEvent>, webhook: Option<WebhookObserver>) -> Self {
        Self { events, webhook }
    }
}

impl ObserverChannel for ServerObserver {
    async fn send(&self, event: &ObserverEvent) -> Result<(), AppError> {
        // No subscribers is not a failure: the stream may reconnect later.
        let _ = self.events.send(event.clone());
        self.webhook.send(event).await
    }
}
