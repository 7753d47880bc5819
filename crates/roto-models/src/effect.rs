//! The static effect registry.
//!
//! Effects are compiled in and versioned with the worker binary. A job
//! names one by its wire tag; unknown tags fail message validation and
//! are dead-lettered rather than retried.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A compiled-in video effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    /// Temporally coherent rotoscope look: bold edges over flat
    /// quantized color
    ScannerDarkly,
}

impl EffectType {
    /// All effects this binary can run.
    pub fn all() -> &'static [EffectType] {
        &[EffectType::ScannerDarkly]
    }

    /// Wire tag, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectType::ScannerDarkly => "scanner_darkly",
        }
    }

    /// Parse a wire tag.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|e| e.as_str() == s)
    }
}

impl fmt::Display for EffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matches_serde() {
        for e in EffectType::all() {
            let json = serde_json::to_string(e).unwrap();
            assert_eq!(json, format!("\"{}\"", e.as_str()));
            assert_eq!(EffectType::parse(e.as_str()), Some(*e));
        }
        assert_eq!(EffectType::parse("does_not_exist"), None);
    }
}
