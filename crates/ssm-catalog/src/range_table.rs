//! Parameter Range Table
//!
//! Descriptive metadata for parameter pickers and log replay: one CSV row
//! per parameter with free-text expected values at idle, cruise and WOT,
//! keyed by the dashboard display name in the last column.

use crate::catalog::{CatalogEntry, ParameterCatalog};
use crate::error::CatalogError;
use serde::Serialize;
use ssm_protocol::DisplayUnit;
use std::io::Read;
use tracing::{debug, warn};

const FIELD_COUNT: usize = 9;
const FALLBACK_RANGE: (f32, f32) = (0.0, 100.0);

/// One row of the range table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub id: String,
    pub kind: String,
    pub unit: DisplayUnit,
    pub name: String,
    pub description: String,
    pub min_expected: String,
    pub typical_expected: String,
    pub max_expected: String,
    pub display_name: String,
}

impl ParameterInfo {
    /// Gauge range guessed from the expected-value columns.
    ///
    /// Uses the first number in the min and max columns; falls back to
    /// `0..100` when either is missing or they are not increasing.
    pub fn expected_range(&self) -> (f32, f32) {
        match (
            first_number(&self.min_expected),
            first_number(&self.max_expected),
        ) {
            (Some(min), Some(max)) if min < max => (min, max),
            _ => FALLBACK_RANGE,
        }
    }
}

impl CatalogEntry for ParameterInfo {
    fn canonical_name(&self) -> &str {
        &self.display_name
    }

    fn entry_id(&self) -> &str {
        &self.id
    }
}

fn first_number(text: &str) -> Option<f32> {
    text.split_whitespace()
        .filter_map(|token| token.parse::<f32>().ok())
        .find(|value| value.is_finite())
}

/// Parse a range table. The header row is skipped; short rows and rows
/// without a display name are logged and dropped.
pub fn parse_range_table<R: Read>(reader: R) -> Result<ParameterCatalog<ParameterInfo>, CatalogError> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    csv.headers()?;

    let mut rows = Vec::new();
    for (index, record) in csv.records().enumerate() {
        // header is line 1
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("Skipping range table line {}: {}", line, e);
                continue;
            }
        };

        if record.len() < FIELD_COUNT {
            warn!(
                "Skipping range table line {}: {} fields, expected {}",
                line,
                record.len(),
                FIELD_COUNT
            );
            continue;
        }

        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let info = ParameterInfo {
            id: field(0),
            kind: field(1),
            unit: DisplayUnit::from_units(&field(2)),
            name: field(3),
            description: field(4),
            min_expected: field(5),
            typical_expected: field(6),
            max_expected: field(7),
            display_name: field(8),
        };

        if info.display_name.is_empty() {
            warn!("Skipping range table line {} ({}): no display name", line, info.id);
            continue;
        }
        rows.push(info);
    }

    debug!("Parsed {} range table rows", rows.len());
    Ok(ParameterCatalog::from_entries(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../testdata/parameter_ranges.csv");

    #[test]
    fn test_parse_fixture() {
        let catalog = parse_range_table(FIXTURE.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 7);
        assert!(catalog.get_by_id("P98").is_none());
        assert!(catalog.get_by_id("P99").is_none());
    }

    #[test]
    fn test_quoted_commas() {
        let catalog = parse_range_table(FIXTURE.as_bytes()).unwrap();
        let rpm = catalog.lookup("rpm").unwrap();
        assert_eq!(rpm.id, "P8");
        assert_eq!(rpm.name, "Engine Speed");
        assert_eq!(rpm.description, "Engine speed, from the crank angle sensor");
        assert_eq!(rpm.unit, DisplayUnit::Rpm);
        assert_eq!(rpm.display_name, "RPM");
    }

    #[test]
    fn test_expected_range() {
        let catalog = parse_range_table(FIXTURE.as_bytes()).unwrap();
        assert_eq!(catalog.lookup("RPM").unwrap().expected_range(), (650.0, 7000.0));
        assert_eq!(catalog.lookup("Boost").unwrap().expected_range(), (-10.0, 20.0));
        assert_eq!(catalog.lookup("Throttle").unwrap().expected_range(), (0.0, 100.0));
        // empty WOT column
        assert_eq!(
            catalog.lookup("Battery Voltage").unwrap().expected_range(),
            FALLBACK_RANGE
        );
        // degenerate range
        assert_eq!(catalog.lookup("DAM").unwrap().expected_range(), FALLBACK_RANGE);
    }

    #[test]
    fn test_sorted_enumeration() {
        let catalog = parse_range_table(FIXTURE.as_bytes()).unwrap();
        assert_eq!(
            catalog.names(),
            vec!["Battery Voltage", "Boost", "Coolant Temp", "DAM", "MAF", "RPM", "Throttle"]
        );
    }

    #[test]
    fn test_header_only() {
        let catalog = parse_range_table("id,type,unit\n".as_bytes()).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("0.15 - 0.40 g/rev"), Some(0.15));
        assert_eq!(first_number("-5 - 0 psi"), Some(-5.0));
        assert_eq!(first_number("n/a"), None);
        assert_eq!(first_number(""), None);
    }
}
