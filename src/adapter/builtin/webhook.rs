//! Webhook pusher: delivers an envelope as JSON to an HTTP endpoint with
//! bounded retries and exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::directory::PusherFactory;
use crate::adapter::{AdapterConfig, NetContext, Pusher};
use crate::envelope::Envelope;

#[derive(Debug, Default, Deserialize)]
struct WebhookPusherConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    max_retries: Option<u8>,
}

pub struct WebhookPusher {
    url: Option<String>,
    timeout: Duration,
    max_retries: u8,
}

pub fn factory() -> Arc<dyn PusherFactory> {
    Arc::new(
        |_instance: Option<&str>, class_cfg: &AdapterConfig, inst_cfg: Option<&AdapterConfig>| {
            let extra = AdapterConfig::merged_extra(class_cfg, inst_cfg);
            let cfg: WebhookPusherConfig = AdapterConfig {
                extra,
                ..Default::default()
            }
            .typed()?;
            Ok(Arc::new(WebhookPusher {
                url: cfg.url,
                timeout: Duration::from_secs(cfg.timeout_secs.unwrap_or(5)),
                max_retries: cfg.max_retries.unwrap_or(3),
            }) as Arc<dyn Pusher>)
        },
    )
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    markdown: String,
    elements: &'a Envelope,
}

#[async_trait]
impl Pusher for WebhookPusher {
    async fn push(&self, content: &Envelope, to: Option<&str>, net: &NetContext) -> Result<()> {
        let dest = to
            .or(self.url.as_deref())
            .ok_or_else(|| anyhow!("webhook pusher has no destination url"))?;

        let payload = WebhookPayload {
            text: content.to_string(),
            markdown: content.as_markdown(),
            elements: content,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = net
                .client
                .post(dest)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("webhook request failed: {e}"));
                }
            }
        }
    }
}
