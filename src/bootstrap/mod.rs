mod server;
mod shutdown;

pub use server::{ServeSummary, Server, ServerError};
pub use shutdown::{wait_for_signal, Reason as ShutdownReason, Shutdown, State as ShutdownState};
