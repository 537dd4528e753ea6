//! Parameter Catalog
//!
//! An immutable name-to-entry mapping. Keys are the canonical display name,
//! lowercased; a small alias table maps common dashboard labels onto
//! canonical names.

use ssm_protocol::ParameterDefinition;
use std::collections::HashMap;
use tracing::warn;

/// Dashboard labels that differ from the vendor's canonical names
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("RPM", "Engine Speed"),
    ("Speed", "Vehicle Speed"),
    ("Coolant Temp", "Coolant Temperature"),
    ("Intake Temp", "Intake Air Temperature"),
    ("MAF", "Mass Airflow"),
    ("Throttle", "Throttle Opening Angle"),
    ("Boost", "Manifold Relative Pressure"),
    ("MAP", "Manifold Absolute Pressure"),
    ("Ignition Timing", "Ignition Total Timing"),
];

/// Something a catalog can hold
pub trait CatalogEntry {
    /// Name the entry is stored and displayed under
    fn canonical_name(&self) -> &str;

    /// Vendor identifier such as `P8`
    fn entry_id(&self) -> &str;
}

impl CatalogEntry for ParameterDefinition {
    fn canonical_name(&self) -> &str {
        self.name()
    }

    fn entry_id(&self) -> &str {
        self.id()
    }
}

/// Result of resolving a list of requested names
#[derive(Debug)]
pub struct Resolution<'a, T> {
    /// Found entries in request order, without duplicates
    pub found: Vec<&'a T>,
    /// Requested names that matched nothing
    pub missing: Vec<String>,
}

/// Immutable catalog of parameters
#[derive(Debug, Clone)]
pub struct ParameterCatalog<T> {
    entries: HashMap<String, T>,
    aliases: HashMap<String, String>,
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl<T: CatalogEntry> ParameterCatalog<T> {
    /// Build from entries with the default alias table. A later entry with
    /// the same canonical name replaces an earlier one.
    pub fn from_entries(entries: impl IntoIterator<Item = T>) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            map.insert(key(entry.canonical_name()), entry);
        }
        Self {
            entries: map,
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(alias, target)| (key(alias), target.to_string()))
                .collect(),
        }
    }

    /// Empty catalog
    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Replace the alias table
    pub fn with_aliases<'a>(mut self, aliases: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.aliases = aliases
            .into_iter()
            .map(|(alias, target)| (key(alias), target.to_string()))
            .collect();
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive lookup, direct name first, then alias
    pub fn lookup(&self, name: &str) -> Option<&T> {
        let found = self.find(name);
        if found.is_none() {
            warn!("Parameter '{}' not found in catalog", name);
        }
        found
    }

    fn find(&self, name: &str) -> Option<&T> {
        let wanted = key(name);
        self.entries.get(&wanted).or_else(|| {
            self.aliases
                .get(&wanted)
                .and_then(|target| self.entries.get(&key(target)))
        })
    }

    /// Look up every name, keeping request order. Misses are returned
    /// rather than logged, since callers resolve on every poll cycle.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Resolution<'_, T> {
        let mut found: Vec<&T> = Vec::with_capacity(names.len());
        let mut missing = Vec::new();

        for name in names {
            let name = name.as_ref();
            match self.find(name) {
                Some(entry) => {
                    let duplicate = found
                        .iter()
                        .any(|seen| seen.canonical_name() == entry.canonical_name());
                    if !duplicate {
                        found.push(entry);
                    }
                }
                None => missing.push(name.to_string()),
            }
        }

        Resolution { found, missing }
    }

    /// First entry with the given vendor id
    pub fn get_by_id(&self, id: &str) -> Option<&T> {
        self.entries.values().find(|entry| entry.entry_id() == id)
    }

    /// Every entry once, sorted by canonical name
    pub fn all_definitions(&self) -> Vec<&T> {
        let mut all: Vec<&T> = self.entries.values().collect();
        all.sort_by(|a, b| a.canonical_name().cmp(b.canonical_name()));
        all
    }

    /// Sorted canonical names
    pub fn names(&self) -> Vec<&str> {
        self.all_definitions()
            .into_iter()
            .map(|entry| entry.canonical_name())
            .collect()
    }
}

impl<T: CatalogEntry> FromIterator<T> for ParameterCatalog<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}
