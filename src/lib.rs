//! sensor-hub: ingestion and live fan-out of soil sensor readings.
//!
//! A field device posts temperature / moisture / ph readings. Each one is
//! validated, appended to a durable log, pushed to every live dashboard and
//! acknowledged. Dashboards backfill through the history query.

pub mod config;
pub mod domain;
pub mod error;
pub mod history;
pub mod hub;
pub mod ingest;
pub mod server;
pub mod store;
pub mod validator;

pub use domain::Reading;
