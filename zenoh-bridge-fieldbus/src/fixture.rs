//! Development fixture: canned readings loaded from a JSON file.

use std::collections::BTreeMap;
use std::path::Path;

use fieldbus_common::{Reading, Result};

/// Parse a JSON object of `label -> number` into readings, sorted by label.
pub fn parse_fixture(content: &str) -> Result<Vec<Reading>> {
    let values: BTreeMap<String, f64> = serde_json::from_str(content)?;
    Ok(values
        .into_iter()
        .map(|(label, value)| Reading::value(label, "", value))
        .collect())
}

/// Load fixture readings from `path`.
pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<Vec<Reading>> {
    let content = std::fs::read_to_string(path)?;
    parse_fixture(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixture() {
        let readings = parse_fixture(r#"{ "temp": 21.5, "flow": 3 }"#).unwrap();
        assert_eq!(
            readings,
            vec![Reading::value("flow", "", 3.0), Reading::value("temp", "", 21.5)]
        );
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(parse_fixture(r#"{ "temp": "warm" }"#).is_err());
        assert!(parse_fixture("[1, 2]").is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_fixture("/nonexistent/fieldbus-fixture.json").is_err());
    }
}
