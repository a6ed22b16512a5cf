//! Parser for the `key = value` sidecar describing a file-backed dataset.
use crate::{Error, Result};
use fnv::FnvHashMap;
use std::path::Path;

pub(crate) const DIMENSIONS: &str = "DIMENSIONS";
pub(crate) const TOTAL_SIZE: &str = "TOTAL_SIZE";
pub(crate) const BATCH_SIZE: &str = "BATCH_SIZE";

/// Key/value pairs from a sidecar file. One `key = value` per line,
/// `#` starts a comment, surrounding whitespace is ignored.
#[derive(Debug, Default)]
pub(crate) struct Sidecar {
    entries: FnvHashMap<String, String>,
}

impl Sidecar {
    pub fn load(path: &Path) -> Result<Sidecar> {
        let text = std::fs::read_to_string(path)?;
        Ok(Sidecar::parse(&text))
    }

    pub fn parse(text: &str) -> Sidecar {
        let mut entries = FnvHashMap::default();
        for line in text.lines() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let (key, value) = match line.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Sidecar { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn get_usize(&self, key: &str) -> Result<usize> {
        let value = self
            .get(key)
            .ok_or_else(|| Error::Format(format!("sidecar is missing key {}", key)))?;
        value
            .parse()
            .map_err(|_| Error::Format(format!("sidecar key {} has non-integer value {:?}", key, value)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let text = "\
# dataset description
DIMENSIONS = 128
TOTAL_SIZE=1000000   # one million vectors
  BATCH_SIZE   =   100000
ignored line without separator
 = value with empty key
";
        let meta = Sidecar::parse(text);
        assert_eq!(meta.get_usize(DIMENSIONS).unwrap(), 128);
        assert_eq!(meta.get_usize(TOTAL_SIZE).unwrap(), 1_000_000);
        assert_eq!(meta.get_usize(BATCH_SIZE).unwrap(), 100_000);
        assert!(meta.get("ignored line without separator").is_none());
    }

    #[test]
    fn test_missing_and_invalid_keys() {
        let meta = Sidecar::parse("DIMENSIONS = twelve\n");
        assert!(matches!(meta.get_usize(DIMENSIONS), Err(Error::Format(_))));
        assert!(matches!(meta.get_usize(TOTAL_SIZE), Err(Error::Format(_))));
    }

    #[test]
    fn test_comment_only_line() {
        let meta = Sidecar::parse("# DIMENSIONS = 4\n");
        assert!(meta.get(DIMENSIONS).is_none());
    }

    #[test]
    fn test_last_value_wins() {
        let meta = Sidecar::parse("A = 1\nA = 2\n");
        assert_eq!(meta.get("A"), Some("2"));
    }
}
