//! smsdispatch - keyword-triggered SMS dispatcher.
//!
//! Inbound short messages are matched against an ordered list of patterns,
//! routed by destination number to a configured endpoint, rendered through a
//! content transform and delivered. Failed deliveries are persisted to a
//! per-endpoint retry directory and redelivered on a timer until they succeed.
//!
//! ```text
//! IncomingMessage -> Dispatcher -> PatternMatcher -> RouteTable
//!                                        |
//!                                 ContentRenderer -> Endpoint::deliver
//!                                                        | (failure)
//!                                                   RetryStore <- RetryScheduler
//! ```

pub mod bootstrap;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod endpoint;
pub mod retry;
pub mod router;
pub mod telemetry;

pub use config::{ConfigError, ConfigGate, Configuration, DispatchConfig, LoadOutcome};
pub use dispatch::{
    DispatchError, Dispatcher, HandleCode, HandleResult, IncomingMessage, ShortMessage,
};
pub use endpoint::{DeliveryError, Endpoint, EndpointKind, EndpointRegistry, Transport};
pub use retry::{DrainReport, PersistError, RetryScheduler, RetryStore};
