//! Adapter classes linked into the binary and registered at process start.

pub mod rss;
pub mod webhook;

use super::directory::{AdapterDirectory, AdapterError};

pub fn register_builtins(directory: &AdapterDirectory) -> Result<(), AdapterError> {
    directory.register_getter("RssGetter", rss::factory())?;
    directory.register_pusher("WebhookPusher", webhook::factory())?;
    Ok(())
}
