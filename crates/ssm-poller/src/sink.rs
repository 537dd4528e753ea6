//! Measurement Sinks
//!
//! Delivery is best effort. A sink that cannot keep up drops snapshots;
//! only a sink whose consumer is gone reports an error.

use crate::snapshot::MeasurementSnapshot;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// The consumer of a sink has gone away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Receives each snapshot the polling engine produces
pub trait MeasurementSink: Send + 'static {
    fn publish(&mut self, snapshot: MeasurementSnapshot) -> Result<(), SinkClosed>;
}

/// Most recent snapshot wins
impl MeasurementSink for watch::Sender<MeasurementSnapshot> {
    fn publish(&mut self, snapshot: MeasurementSnapshot) -> Result<(), SinkClosed> {
        if self.is_closed() {
            return Err(SinkClosed);
        }
        self.send_replace(snapshot);
        Ok(())
    }
}

impl MeasurementSink for mpsc::Sender<MeasurementSnapshot> {
    fn publish(&mut self, snapshot: MeasurementSnapshot) -> Result<(), SinkClosed> {
        match self.try_send(snapshot) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                debug!("Sink full, dropping snapshot {}", dropped.sequence);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkClosed),
        }
    }
}

impl MeasurementSink for crossbeam_channel::Sender<MeasurementSnapshot> {
    fn publish(&mut self, snapshot: MeasurementSnapshot) -> Result<(), SinkClosed> {
        match self.try_send(snapshot) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Full(dropped)) => {
                debug!("Sink full, dropping snapshot {}", dropped.sequence);
                Ok(())
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Err(SinkClosed),
        }
    }
}
