//! Operator alerts: escalation and fault notifications reuse the normal
//! push path against the `[alert] to` destination list. A failure while
//! delivering an alert is logged and dropped — it never feeds back into
//! another alert.

use tracing::error;

use super::Engine;
use crate::adapter::{NetContext, PusherSpec};
use crate::envelope::Envelope;

impl Engine {
    pub async fn alert(&self, content: Envelope) {
        let cfg = self.config.snapshot();
        if cfg.alert.to.is_empty() {
            return;
        }
        let net = match NetContext::with_proxy(cfg.network.proxy.as_deref()) {
            Ok(net) => net,
            Err(e) => {
                error!(target: "push", error = %e, "alert skipped, no usable network context");
                return;
            }
        };
        for raw in &cfg.alert.to {
            let spec = match PusherSpec::parse(raw) {
                Ok(spec) => spec,
                Err(e) => {
                    error!(target: "push", dest = %raw, error = %e, "invalid alert destination");
                    continue;
                }
            };
            if let Err(e) = self.push_to_spec(&spec, &content, &net).await {
                error!(
                    target: "push",
                    dest = %spec,
                    error = %format!("{e:#}"),
                    "failed to deliver alert"
                );
            }
        }
    }
}
