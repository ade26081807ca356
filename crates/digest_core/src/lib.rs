//! Digest core: configuration model, items, filter chain and task lifecycle.
//!
//! Everything here is pure; network and filesystem work lives in `digest_engine`.
mod config;
mod filter;
mod item;
mod lifecycle;

pub use config::{
    is_valid_slug, ConfigError, EngineConfig, FilterAction, FilterSpec, HttpMethod, MatchMode,
    Scope, Settings, SourceSpec, TaskConfig,
};
pub use filter::{apply, ContractViolation, FilterChain};
pub use item::{Item, SourceRef};
pub use lifecycle::{TaskLifecycle, TaskStatus, TransitionError};
