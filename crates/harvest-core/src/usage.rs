//! Usage percentage extraction.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Memory usage in whole percent, always within 0..=100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct UsagePercentage(u8);

impl UsagePercentage {
    /// Clamp `raw` into range.
    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(0, 100) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u32> for UsagePercentage {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > 100 {
            return Err(format!("usage {value}% is out of range"));
        }
        Ok(Self(value as u8))
    }
}

impl From<UsagePercentage> for u32 {
    fn from(value: UsagePercentage) -> Self {
        value.0 as u32
    }
}

impl fmt::Display for UsagePercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// Qualified forms come before the bare `N%` so an unrelated percentage
// earlier in the text does not win.
static PERCENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(\d{1,3})\s*%\s*(?:滿|已使用|已用|used)",
        r"(?i)(\d{1,3})\s*%\s*(?:full|used|of\s+memory)",
        r"(\d{1,3})\s*%\s*滿?",
        r"(?i)(?:memory|記憶|usage|使用)[:：\s]*(\d{1,3})\s*%",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid usage pattern"))
    .collect()
});

static FRACTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,5})\s*/\s*(\d{1,5})").expect("valid fraction pattern"));

/// First percentage found in `text`, clamped into range.
///
/// Patterns are tried in order; a fraction `used/total` is the last resort.
pub fn extract(text: &str) -> Option<UsagePercentage> {
    for pattern in PERCENT_PATTERNS.iter() {
        if let Some(value) = pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
        {
            return Some(UsagePercentage::clamped(value));
        }
    }

    let caps = FRACTION_PATTERN.captures(text)?;
    let used: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total: f64 = caps.get(2)?.as_str().parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(UsagePercentage::clamped((used / total * 100.0).round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_percent_with_fullness_suffix() {
        assert_eq!(extract("已使用 87% 滿").map(|u| u.value()), Some(87));
        assert_eq!(extract("Memory 42 % full").map(|u| u.value()), Some(42));
    }

    #[test]
    fn qualified_percent_beats_an_earlier_bare_one() {
        let text = "Plan discount 5% this month. Memory 90% full";
        assert_eq!(extract(text).map(|u| u.value()), Some(90));
        assert_eq!(extract("優惠 10%，記憶 75% 已使用").map(|u| u.value()), Some(75));
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(extract("usage 140%").map(|u| u.value()), Some(100));
        assert_eq!(UsagePercentage::clamped(-5).value(), 0);
    }

    #[test]
    fn falls_back_to_fraction() {
        assert_eq!(extract("used 30/120 entries").map(|u| u.value()), Some(25));
        assert_eq!(extract("0/0"), None);
    }

    #[test]
    fn text_without_numbers_has_no_usage() {
        assert_eq!(extract("Manage memory"), None);
    }

    #[test]
    fn displays_with_percent_sign() {
        assert_eq!(UsagePercentage::clamped(87).to_string(), "87%");
        assert!(serde_json::from_value::<UsagePercentage>(serde_json::json!(101)).is_err());
    }
}
