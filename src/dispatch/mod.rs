//! Dispatch: match, route, render, deliver or persist for retry.

mod dispatcher;
mod message;
mod stats;

pub use dispatcher::Dispatcher;
pub use message::{IncomingMessage, MessageHeader, ShortMessage};
pub use stats::{DispatchStats, StatsSnapshot};

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::content::TransformError;
use crate::retry::PersistError;

/// Code reported to the host for a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct HandleCode(u8);

impl HandleCode {
    /// Handled; no further handlers run.
    pub const HANDLED: Self = Self(1);
    /// Handled; later handlers still run.
    pub const HANDLED_CONTINUE: Self = Self(2);
    /// Handled, with host-defined follow-up.
    pub const HANDLED_HOST: Self = Self(3);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for HandleCode {
    fn default() -> Self {
        Self::HANDLED
    }
}

impl TryFrom<u8> for HandleCode {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1..=3 => Ok(Self(value)),
            other => Err(ConfigError::invalid(
                "return_value",
                format!("{other} is not one of 1, 2 or 3"),
            )),
        }
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "code", rename_all = "snake_case")]
pub enum HandleResult {
    /// No pattern matched or the destination is not routed.
    NotHandled,
    Handled(HandleCode),
    HandledContinue(HandleCode),
}

impl HandleResult {
    /// Result reported for a matched message.
    pub fn for_code(code: HandleCode) -> Self {
        if code == HandleCode::HANDLED_CONTINUE {
            HandleResult::HandledContinue(code)
        } else {
            HandleResult::Handled(code)
        }
    }

    pub fn is_handled(&self) -> bool {
        !matches!(self, HandleResult::NotHandled)
    }

    /// Numeric code; 0 when not handled.
    pub fn code(&self) -> u8 {
        match self {
            HandleResult::NotHandled => 0,
            HandleResult::Handled(code) | HandleResult::HandledContinue(code) => code.value(),
        }
    }
}

/// Failure to handle a message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Delivery failed and the payload could not be persisted. The host
    /// must stop accepting messages.
    #[error("payload could not be delivered or persisted: {0}")]
    Fatal(#[source] PersistError),

    /// The payload could not be rendered; nothing was delivered or queued.
    #[error("content transform failed: {0}")]
    Transform(#[source] TransformError),
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Fatal(_))
    }
}
