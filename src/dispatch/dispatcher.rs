use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::stats::{DispatchStats, StatsSnapshot};
use super::{DispatchError, HandleResult, IncomingMessage};
use crate::config::Configuration;
use crate::content::CanonicalDocument;
use crate::router::RouteDecision;

/// Handles inbound messages against an installed [`Configuration`].
///
/// Cheap to clone; clones share configuration and counters.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<Configuration>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self {
            config,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Match, route, render and deliver one message.
    ///
    /// A failed delivery is persisted for retry and still reported as
    /// handled. Only a failed persist is fatal.
    pub async fn handle<M>(&self, msg: &M) -> Result<HandleResult, DispatchError>
    where
        M: IncomingMessage + ?Sized,
    {
        let (pattern, index) = match self.config.decide(msg.body(), msg.to()) {
            RouteDecision::NoMatch => {
                debug!(from = %msg.from(), to = %msg.to(), "no pattern matched");
                DispatchStats::incr(&self.stats.not_handled);
                return Ok(HandleResult::NotHandled);
            }
            RouteDecision::NoRoute { pattern } => {
                warn!(pattern, to = %msg.to(), "matched message has no route for destination");
                DispatchStats::incr(&self.stats.not_handled);
                return Ok(HandleResult::NotHandled);
            }
            RouteDecision::Routed { pattern, endpoint } => (pattern, endpoint),
        };

        let Some(endpoint) = self.config.endpoint(index) else {
            warn!(pattern, endpoint = index, "route points at an unconfigured endpoint");
            DispatchStats::incr(&self.stats.not_handled);
            return Ok(HandleResult::NotHandled);
        };

        let doc = CanonicalDocument::from_message(msg, Utc::now(), self.config.timezone());
        let payload = match self.config.renderer().render(&doc) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(pattern, endpoint = index, error = %e, "content transform failed");
                DispatchStats::incr(&self.stats.transform_failures);
                return Err(DispatchError::Transform(e));
            }
        };
        debug!(pattern, endpoint = index, bytes = payload.len(), "payload rendered");

        match endpoint.deliver(&payload).await {
            Ok(()) => {
                info!(pattern, endpoint = index, to = %msg.to(), "message delivered");
                DispatchStats::incr(&self.stats.delivered);
            }
            Err(e) => {
                warn!(endpoint = index, error = %e, "delivery failed; scheduling retry");

                match endpoint.schedule_retry(&payload).await {
                    Ok(record) => {
                        info!(
                            endpoint = index,
                            record = %record.display(),
                            "message queued for retry"
                        );
                        DispatchStats::incr(&self.stats.queued_for_retry);
                    }
                    Err(e) => {
                        error!(
                            endpoint = index,
                            error = %e,
                            "unable to persist undelivered message"
                        );
                        DispatchStats::incr(&self.stats.persist_failures);
                        return Err(DispatchError::Fatal(e));
                    }
                }
            }
        }

        DispatchStats::incr(&self.stats.handled);
        Ok(HandleResult::for_code(self.config.handle_code()))
    }
}
