//! Booking and inventory services.
//!
//! Built once at startup by [`Services::new`] and shared with the HTTP layer
//! through axum state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::media::BlobStorage;
use crate::store::DocumentStore;
use crate::utils::error::AppError;

pub mod analytics;
pub mod booking;
pub mod catalog;
pub mod feed;
pub mod ledger;
pub mod register;

pub use analytics::{EventSales, OrganizerAnalytics, SalesReport};
pub use booking::BookingService;
pub use catalog::{DeletionReport, EventCatalog};
pub use feed::LiveFeed;
pub use ledger::{Authorization, InventoryLedger, LedgerAudit, Rejection, Remaining};
pub use register::BookingRegister;

/// Bounded retry of transactions that lost an optimistic race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` waits `n * backoff` before trying again.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.purchase_max_attempts, config.retry_backoff)
    }

    /// Runs `attempt` until it succeeds, fails with a non-conflict error, or
    /// the attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(AppError::TransactionConflict(reason)) if tries < self.max_attempts => {
                    tracing::debug!(operation, attempt = tries, %reason, "Transaction conflict, retrying");
                    tokio::time::sleep(self.backoff * tries).await;
                    tries += 1;
                }
                Err(AppError::TransactionConflict(reason)) => {
                    tracing::warn!(operation, attempts = tries, %reason, "Giving up after repeated conflicts");
                    return Err(AppError::TransactionConflict(format!(
                        "{operation} gave up after {tries} attempt(s): {reason}"
                    )));
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(10))
    }
}

#[derive(Clone)]
pub struct Services {
    pub ledger: InventoryLedger,
    pub bookings: BookingService,
    pub register: BookingRegister,
    pub catalog: EventCatalog,
    pub analytics: OrganizerAnalytics,
    pub feed: LiveFeed,
    pub media: Arc<dyn BlobStorage>,
}

impl Services {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn BlobStorage>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger: InventoryLedger::new(Arc::clone(&store)),
            bookings: BookingService::new(Arc::clone(&store), policy),
            register: BookingRegister::new(Arc::clone(&store), policy),
            catalog: EventCatalog::new(Arc::clone(&store), Arc::clone(&media), policy),
            analytics: OrganizerAnalytics::new(Arc::clone(&store)),
            feed: LiveFeed::new(store),
            media,
        }
    }
}
