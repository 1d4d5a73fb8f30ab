//! Cron ticker: notifies every service with `tick` on a schedule.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::service::{ServiceEvent, ServiceRegistry};

/// Parse a cron expression (seconds field included).
pub fn parse_schedule(expression: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expression).map_err(|e| ConfigError::InvalidValue {
        key: "tick schedule".into(),
        message: e.to_string(),
    })
}

/// Spawn the ticker. It ends when the schedule has no further fire time
/// or the registry stops.
pub fn spawn_ticker(
    registry: Arc<ServiceRegistry>,
    schedule: Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(schedule = %schedule, "Tick schedule started");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                info!("Tick schedule exhausted");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if registry.is_stopped() {
                break;
            }
            debug!(at = %next, "Tick");
            registry.notify(ServiceEvent::Tick).await;
        }
    })
}
