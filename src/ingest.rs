//! ==============================================================================
//! ingest.rs - validate → persist → broadcast → acknowledge
//! ==============================================================================
//!
//! order matters:
//!     a reading is published only after the store has durably accepted it.
//!     viewers therefore never see a live point that a later history query
//!     cannot return. nothing here retries; the device resends if it wants to.
//!
//! relationships:
//!     - uses: validator.rs, store/ (ReadingStore port), hub.rs
//!     - used by: server.rs (POST /api/sensor-data)
//!
//! ==============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::domain::{Reading, StoreId};
use crate::error::Rejection;
use crate::hub::BroadcastHub;
use crate::store::{with_timeout, ReadingStore};
use crate::validator;

/// returned once a reading is durably stored
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Ack {
    pub id: StoreId,
    pub reading: Reading,
    /// live subscribers the reading was queued for
    pub delivered: usize,
}

pub struct IngestionService {
    store: Arc<dyn ReadingStore>,
    hub: BroadcastHub,
    io_timeout: Option<Duration>,
    log_readings: bool,
}

impl IngestionService {
    pub fn new(store: Arc<dyn ReadingStore>, hub: BroadcastHub) -> Self {
        Self {
            store,
            hub,
            io_timeout: None,
            log_readings: false,
        }
    }

    /// bound each store append
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// log every accepted reading at info level
    pub fn with_reading_log(mut self, enabled: bool) -> Self {
        self.log_readings = enabled;
        self
    }

    pub async fn submit(&self, payload: &Value) -> Result<Ack, Rejection> {
        let reading = validator::validate(payload).map_err(|e| {
            tracing::info!(reason = %e, "reading rejected");
            e
        })?;

        let id = with_timeout(self.io_timeout, self.store.append(reading))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to persist reading");
                e
            })?;

        // a panic while fanning out must not undo an acknowledged append
        let delivered = match catch_unwind(AssertUnwindSafe(|| self.hub.publish(&reading))) {
            Ok(report) => report.delivered,
            Err(_) => {
                tracing::error!(id = id.0, "broadcast panicked, reading stored but not pushed");
                0
            }
        };

        if self.log_readings {
            tracing::info!(
                id = id.0,
                temperature = reading.temperature,
                moisture = reading.moisture,
                ph = reading.ph,
                viewers = delivered,
                "reading accepted"
            );
        }

        Ok(Ack {
            id,
            reading,
            delivered,
        })
    }
}
