//! Measurements and Snapshots

use chrono::{DateTime, Utc};
use ring_buffer::HistoryRing;
use serde::Serialize;
use ssm_protocol::{convert, DisplayUnit};
use std::collections::BTreeMap;

/// One decoded value, in the unit declared by its definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub value: f32,
    pub unit: DisplayUnit,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f32, unit: DisplayUnit, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            timestamp,
        }
    }

    /// Value re-expressed in `unit` for display. The measurement itself is
    /// unchanged.
    pub fn display_value(&self, unit: DisplayUnit) -> f32 {
        convert(self.value, self.unit, unit)
    }
}

/// Everything known after a poll cycle.
///
/// Values not refreshed this cycle are carried forward from the previous
/// snapshot with their original timestamps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasurementSnapshot {
    /// Cycle counter, starting at 1 for the first published snapshot
    pub sequence: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub measurements: BTreeMap<String, Measurement>,
    /// Recent values of the configured history fields, oldest first
    pub history: BTreeMap<String, HistoryRing<f32>>,
    /// Subscribed names the catalog could not resolve
    pub missing: Vec<String>,
}

impl MeasurementSnapshot {
    pub fn get(&self, name: &str) -> Option<&Measurement> {
        self.measurements.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f32> {
        self.get(name).map(|m| m.value)
    }

    pub fn history(&self, field: &str) -> Option<&HistoryRing<f32>> {
        self.history.get(field)
    }

    /// Fold this cycle's values over the previous snapshot.
    ///
    /// `history_keys` pairs each history field with the measurement name
    /// that feeds it.
    pub(crate) fn advance(
        &self,
        fresh: Vec<Measurement>,
        missing: Vec<String>,
        timestamp: DateTime<Utc>,
        history_keys: &[(String, String)],
        history_capacity: usize,
    ) -> Self {
        let mut next = self.clone();
        next.sequence += 1;
        next.timestamp = Some(timestamp);
        next.missing = missing;

        for (field, key) in history_keys {
            if let Some(measurement) = fresh.iter().find(|m| &m.name == key) {
                next.history
                    .entry(field.clone())
                    .or_insert_with(|| HistoryRing::new(history_capacity))
                    .push(measurement.value);
            }
        }

        for measurement in fresh {
            next.measurements.insert(measurement.name.clone(), measurement);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    fn keys() -> Vec<(String, String)> {
        vec![("RPM".to_string(), "Engine Speed".to_string())]
    }

    #[test]
    fn test_fold_forward_keeps_unrefreshed_values() {
        let first = MeasurementSnapshot::default().advance(
            vec![
                Measurement::new("Engine Speed", 800.0, DisplayUnit::Rpm, at(0)),
                Measurement::new("Coolant Temp", 85.0, DisplayUnit::Celsius, at(0)),
            ],
            vec![],
            at(0),
            &keys(),
            3,
        );
        let second = first.advance(
            vec![Measurement::new("Engine Speed", 900.0, DisplayUnit::Rpm, at(1))],
            vec!["Bogus".to_string()],
            at(1),
            &keys(),
            3,
        );

        assert_eq!(second.sequence, 2);
        assert_eq!(second.value("Engine Speed"), Some(900.0));
        // carried forward with its original timestamp
        let coolant = second.get("Coolant Temp").unwrap();
        assert_eq!(coolant.value, 85.0);
        assert_eq!(coolant.timestamp, at(0));
        assert_eq!(second.missing, vec!["Bogus".to_string()]);
        assert_eq!(second.timestamp, Some(at(0) + Duration::seconds(1)));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut snapshot = MeasurementSnapshot::default();
        for i in 0..5 {
            snapshot = snapshot.advance(
                vec![Measurement::new("Engine Speed", i as f32, DisplayUnit::Rpm, at(i))],
                vec![],
                at(i),
                &keys(),
                3,
            );
        }
        assert_eq!(snapshot.history("RPM").unwrap().to_vec(), vec![2.0, 3.0, 4.0]);
        assert!(snapshot.history("Boost").is_none());
    }

    #[test]
    fn test_display_value_leaves_stored_unit() {
        let m = Measurement::new("Coolant Temp", 100.0, DisplayUnit::Celsius, at(0));
        assert!((m.display_value(DisplayUnit::Fahrenheit) - 212.0).abs() < 0.01);
        assert_eq!(m.unit, DisplayUnit::Celsius);
        assert_eq!(m.value, 100.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = MeasurementSnapshot::default().advance(
            vec![Measurement::new("Engine Speed", 2616.75, DisplayUnit::Rpm, at(0))],
            vec![],
            at(0),
            &keys(),
            3,
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["sequence"], 1);
        assert_eq!(json["measurements"]["Engine Speed"]["value"], 2616.75);
        assert_eq!(json["history"]["RPM"], serde_json::json!([2616.75]));
    }
}
