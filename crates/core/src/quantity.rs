//! Kubernetes resource quantities (`100m`, `512Mi`, `1e3`, `0`).
//!
//! Only the zero test is needed by the rules, so the string is kept verbatim
//! and parsed on demand.

use serde::{Deserialize, Serialize};

/// Suffixes accepted by the API server. `E` is handled separately.
const SUFFIXES: [&str; 14] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "n", "u", "m", "k", "M", "G", "T", "P"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Quantity(pub String);

impl Quantity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value with the suffix stripped, or `None` when malformed.
    pub fn mantissa(&self) -> Option<f64> {
        let s = self.0.trim();
        if s.is_empty() {
            return None;
        }
        let mut body = s;
        if let Some(stripped) = s.strip_suffix('E') {
            // Exa suffix, not an exponent marker
            body = stripped;
        } else {
            for suf in SUFFIXES.iter() {
                if let Some(stripped) = s.strip_suffix(suf) {
                    body = stripped;
                    break;
                }
            }
        }
        body.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Malformed quantities are reported as zero: they declare nothing usable.
    pub fn is_zero(&self) -> bool {
        self.mantissa().map(|v| v == 0.0).unwrap_or(true)
    }
}

impl From<&str> for Quantity {
    fn from(s: &str) -> Self {
        Quantity(s.to_string())
    }
}

impl From<String> for Quantity {
    fn from(s: String) -> Self {
        Quantity(s)
    }
}
