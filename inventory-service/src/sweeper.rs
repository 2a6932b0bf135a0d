use chrono::Utc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::reservations::ReservationManager;

/// Periodically hands lapsed reservations back to available stock.
pub struct ReservationSweeper {
    manager: ReservationManager,
    interval: Duration,
    batch_size: i64,
}

impl ReservationSweeper {
    /// `batch_size` below 1 is raised to 1, and a zero `interval` to one
    /// second, so a sweep always terminates and the loop always ticks.
    pub fn new(manager: ReservationManager, interval: Duration, batch_size: i64) -> Self {
        Self {
            manager,
            interval: interval.max(Duration::from_secs(1)),
            batch_size: batch_size.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Error releasing expired reservations: {}", e);
            }
        }
    }

    /// Drains due reservations in batches until a batch comes back short.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let mut total = 0;

        loop {
            let released = self.manager.release_expired(Utc::now(), self.batch_size).await?;
            total += released;
            if (released as i64) < self.batch_size {
                break;
            }
        }

        if total > 0 {
            info!(released = total, "Expired reservations released");
        }

        Ok(total)
    }
}
