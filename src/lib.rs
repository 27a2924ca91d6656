//! Offline resource cache and background-synchronization engine.
//!
//! Provides:
//! - `build` — Fingerprint the static-asset tree and build the precache manifest
//! - `strategy` — Classify requests into cache-first / network-first / network-only
//! - `cache` — Versioned cache generations and the per-request strategies
//! - `sync` — Durable queue of mutating requests replayed when connectivity returns
//! - `notify` — Push notification rendering and click routing
//! - `engine` / `event` — The engine and the single-task event loop that drives it

pub mod build;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod http;
pub mod logging;
pub mod notify;
pub mod strategy;
pub mod sync;

pub use build::{BuildArtifacts, PrecacheManifest, Version};
pub use cache::{Served, ServedFrom};
pub use config::Config;
pub use engine::{Engine, Lifecycle};
pub use error::{EngineError, FetchError};
pub use event::{spawn, EngineHandle, Event};
pub use host::ClientHost;
pub use http::{HttpNetwork, Network, Request, Response};
pub use strategy::{Route, Strategy, StrategyClassifier};
