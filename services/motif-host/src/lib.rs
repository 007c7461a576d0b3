//! Motif host registry and dispatch.
//!
//! Hosts come from a manifest, catalog prefixes, an optional neuPrint backend, and temporary
//! uploads. [`dispatch::QueryDispatcher`] is the request-time entry point; it resolves a host
//! uri against the [`registry::HostRegistry`] first and falls back to the durable
//! [`store::HostStore`].

pub mod catalog;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod graph;
pub mod http;
pub mod motif;
pub mod provider;
pub mod provision;
pub mod registry;
pub mod reload;
pub mod remote;
pub mod service;
pub mod store;

pub use dispatch::{QueryDispatcher, QueryOutcome};
pub use error::{ConfigError, DiscoveryWarning, HostError, HostResult};
pub use motif::Motif;
pub use provider::{HostProvider, HostSummary, Provider};
pub use registry::{CollisionPolicy, HostRegistry};
