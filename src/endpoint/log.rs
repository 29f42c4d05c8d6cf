//! Endpoint that writes payloads to the log.
//!
//! Besides being a sink for development setups, it can simulate an
//! unreliable downstream: a failure probability and a gaussian delivery
//! delay, both driven by an optionally seeded generator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{DeliveryError, EndpointKind, Transport};
use crate::config::{ConfigError, LogEndpointConfig};

/// Callbacks around every delivery attempt.
pub trait LogObserver: Send + Sync {
    fn on_attempt(&self, _payload: &str) {}
    fn on_failure(&self, _payload: &str) {}
    fn on_delivered(&self, _payload: &str) {}
}

/// Log sink transport.
pub struct LogEndpoint {
    /// f64 bits
    fail_rate: AtomicU64,
    delay_mean: Duration,
    delay_std_dev: Duration,
    rng: Mutex<StdRng>,
    observer: Option<Arc<dyn LogObserver>>,
}

impl fmt::Debug for LogEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEndpoint")
            .field("fail_rate", &self.fail_rate())
            .field("delay_mean", &self.delay_mean)
            .field("delay_std_dev", &self.delay_std_dev)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for LogEndpoint {
    fn default() -> Self {
        Self::new(&LogEndpointConfig::default())
    }
}

impl LogEndpoint {
    pub fn new(config: &LogEndpointConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            fail_rate: AtomicU64::new(config.fail_rate.clamp(0.0, 1.0).to_bits()),
            delay_mean: config.delay_mean,
            delay_std_dev: config.delay_std_dev,
            rng: Mutex::new(rng),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LogObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn fail_rate(&self) -> f64 {
        f64::from_bits(self.fail_rate.load(Ordering::SeqCst))
    }

    /// Change the failure probability at runtime.
    pub fn set_fail_rate(&self, rate: f64) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::invalid(
                "fail_rate",
                format!("{rate} is outside 0..=1"),
            ));
        }
        self.fail_rate.store(rate.to_bits(), Ordering::SeqCst);
        debug!(fail_rate = rate, "log endpoint fail rate changed");
        Ok(())
    }

    /// Draw the failure decision and delay for one attempt.
    fn draw(&self) -> (bool, Duration) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let fail = rng.gen::<f64>() < self.fail_rate();
        // Spread only applies around a positive mean.
        let delay = if self.delay_mean.is_zero() {
            Duration::ZERO
        } else {
            let secs = gaussian(
                &mut *rng,
                self.delay_mean.as_secs_f64(),
                self.delay_std_dev.as_secs_f64(),
            );
            Duration::from_secs_f64(secs.max(0.0))
        };

        (fail, delay)
    }
}

/// Normal deviate via Box-Muller.
fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + z * std_dev
}

#[async_trait]
impl Transport for LogEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Log
    }

    async fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        if let Some(observer) = &self.observer {
            observer.on_attempt(payload);
        }

        let (fail, delay) = self.draw();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fail {
            if let Some(observer) = &self.observer {
                observer.on_failure(payload);
            }
            return Err(DeliveryError::Rejected("simulated log endpoint failure".into()));
        }

        info!(
            target: "smsdispatch::delivery",
            bytes = payload.len(),
            payload = %payload,
            "delivered"
        );

        if let Some(observer) = &self.observer {
            observer.on_delivered(payload);
        }
        Ok(())
    }
}
