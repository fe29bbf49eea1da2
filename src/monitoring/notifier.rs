use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{DispatchError, Result};
use crate::monitoring::Decision;
use crate::sourcing::Opportunity;

const TELEGRAM_API: &str = "https://api.telegram.org";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatcher alerts over the Telegram bot API. Silently skipped when unconfigured.
pub struct TelegramNotifier {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
    client: Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: TELEGRAM_API.to_string(),
            client: http_client(DEFAULT_HTTP_TIMEOUT),
        }
    }

    /// Bound every request, connect included, by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    pub async fn send_notification(&self, message: &str) -> Result<()> {
        let (bot_token, chat_id) = match (&self.bot_token, &self.chat_id) {
            (Some(token), Some(chat)) => (token, chat),
            _ => {
                info!("Notification skipped: bot token or chat ID not configured");
                return Ok(());
            }
        };

        // Send message
        let url = format!("{}/bot{}/sendMessage", self.api_base, bot_token);

        let response = self
            .client
            .post(&url)
            .form(&[
                ("chat_id", chat_id.as_str()),
                ("text", message),
                ("parse_mode", "HTML"),
            ])
            .send()
            .await
            .map_err(|e| DispatchError::notification_error(e.to_string()))?;

        // Check response
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to send notification: {}", error_text);
            return Err(DispatchError::notification_error(error_text));
        }

        info!("Notification sent");
        Ok(())
    }

    pub async fn notify_assignment(&self, opportunity: &Opportunity, worker_id: &str) -> Result<()> {
        let message = format!(
            "<b>Load Booked</b>\n\n\
            Load: <b>{}</b>\n\
            Lane: <b>{}</b>\n\
            Equipment: <b>{}</b>\n\
            Rate: <b>${:.2}</b> ({:.1}% margin)\n\
            Driver: <b>{}</b>",
            opportunity.id,
            opportunity.lane,
            opportunity.equipment_class,
            opportunity.rate,
            opportunity.profitability.margin_pct,
            worker_id
        );

        self.send_notification(&message).await
    }

    pub async fn notify_strategic_alert(&self, decision: &Decision) -> Result<()> {
        let message = format!(
            "<b>Dispatch Alert: {}</b>\n\n{}\nConfidence: <b>{:.0}%</b>",
            decision.kind.label(),
            decision.reasoning,
            decision.confidence
        );

        self.send_notification(&message).await
    }
}

pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        error!("HTTP client setup failed, falling back to defaults: {}", e);
        Client::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcing::opportunity::fixtures::load_with_margin;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        let notifier = TelegramNotifier::disabled();
        assert!(!notifier.is_configured());
        let load = load_with_margin("l", "A→B", 20.0);
        notifier.notify_assignment(&load, "drv-1").await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // accepts connections and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = TelegramNotifier::new(Some("token".to_string()), Some("42".to_string()))
            .with_api_base(format!("http://{}", addr))
            .with_timeout(Duration::from_millis(100));

        let result = tokio::time::timeout(Duration::from_secs(5), notifier.send_notification("hello"))
            .await
            .expect("request was not bounded");
        assert!(matches!(result, Err(DispatchError::Notification(_))));
        server.abort();
    }
}
