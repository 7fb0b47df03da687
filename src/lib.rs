// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod adapter;
pub mod api;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod metrics;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::adapter::directory::AdapterDirectory;
pub use crate::adapter::{Getter, ItemDetail, NetContext, Pusher};
pub use crate::config::{AppConfig, ConfigHandle};
pub use crate::engine::Engine;
pub use crate::envelope::Envelope;
pub use crate::store::{ArticleStore, MemoryStore, SqliteStore};
