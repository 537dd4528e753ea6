//! SSM Polling Engine
//!
//! Reads the subscribed subset of a parameter catalog on a fixed cadence
//! and publishes timestamped measurement snapshots. One blocking loop owns
//! the serial session; the subscription set is the only shared state.

mod derived;
mod poller;
mod sink;
mod snapshot;
mod subscription;

pub use derived::{gauge_pressure, GaugePressureRule, ATMOSPHERIC_PRESSURE_KPA};
pub use poller::{CatalogSource, PollerConfig, PollerHandle, PollingEngine};
pub use sink::{MeasurementSink, SinkClosed};
pub use snapshot::{Measurement, MeasurementSnapshot};
pub use subscription::{subscription_channel, SubscriptionHandle, SubscriptionSet};
