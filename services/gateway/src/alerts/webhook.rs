//! Generic HTTP webhook delivery.
//!
//! Ships the raw [`AlertMessage`] JSON to a configured URL with POST or
//! PUT and any extra headers from config.  Consumers get the full
//! projection and do their own formatting.

use super::{AlertError, AlertMessage, execute};
use crate::config::WebhookSettings;

pub struct WebhookSink {
    url: String,
    method: reqwest::Method,
    headers: Vec<(String, String)>,
}

impl WebhookSink {
    pub fn new(settings: &WebhookSettings) -> Self {
        let method = if settings.method == "PUT" {
            reqwest::Method::PUT
        } else {
            reqwest::Method::POST
        };
        WebhookSink {
            url: settings.url.clone(),
            method,
            headers: settings.headers.clone(),
        }
    }

    pub async fn deliver(
        &self,
        client: &reqwest::Client,
        msg: &AlertMessage,
    ) -> Result<(), AlertError> {
        let mut request = client.request(self.method.clone(), &self.url).json(msg);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        execute(request).await
    }
}
