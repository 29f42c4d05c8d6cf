//! Configuration: the serde document, its validation, and the compiled
//! [`Configuration`] installed once through a [`ConfigGate`].

mod error;
pub mod loader;
mod runtime;
mod types;

pub use error::ConfigError;
pub use loader::Format;
pub use runtime::{ConfigGate, Configuration, LoadOutcome};
pub use types::*;
