//! Mobile network operator names keyed by MCC/MNC

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
struct OperatorEntry {
    mcc: String,
    mnc: String,
    #[serde(default)]
    name: String,
}

/// Lookup table loaded from a JSON list of `{mcc, mnc, name, ...}` objects
#[derive(Debug, Clone, Default)]
pub struct OperatorDirectory {
    names: HashMap<(String, String), String>,
}

impl OperatorDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<OperatorEntry> = serde_json::from_str(json)?;
        let mut names = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.name.is_empty() {
                continue;
            }
            // First entry wins, matching a linear scan of the list
            names.entry((entry.mcc, entry.mnc)).or_insert(entry.name);
        }
        Ok(Self { names })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_json(&raw)?)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn lookup(&self, mcc: &str, mnc: &str) -> Option<&str> {
        self.names
            .get(&(mcc.to_string(), mnc.to_string()))
            .map(String::as_str)
    }

    /// Resolve a 5 or 6 digit numeric operator code; anything else is returned as is
    pub fn resolve(&self, operator: &str) -> String {
        let numeric = operator.chars().all(|c| c.is_ascii_digit());
        if numeric && (operator.len() == 5 || operator.len() == 6) {
            if let Some(name) = self.lookup(&operator[..3], &operator[3..]) {
                return name.to_string();
            }
        }
        operator.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"mcc": "466", "mnc": "92", "iso": "tw", "country": "Taiwan", "country_code": "886", "name": "Chunghwa Telecom"},
        {"mcc": "466", "mnc": "01", "iso": "tw", "country": "Taiwan", "country_code": "886", "name": "Far EasTone"},
        {"mcc": "310", "mnc": "260", "name": "T-Mobile"}
    ]"#;

    #[test]
    fn test_lookup() {
        let dir = OperatorDirectory::from_json(SAMPLE).unwrap();
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.lookup("466", "92"), Some("Chunghwa Telecom"));
        assert_eq!(dir.lookup("466", "93"), None);
    }

    #[test]
    fn test_resolve_numeric_codes() {
        let dir = OperatorDirectory::from_json(SAMPLE).unwrap();
        assert_eq!(dir.resolve("46692"), "Chunghwa Telecom");
        assert_eq!(dir.resolve("310260"), "T-Mobile");
        assert_eq!(dir.resolve("46699"), "46699");
        assert_eq!(dir.resolve("CHT"), "CHT");
    }
}
