use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Pole numbers follow the contractor labelling scheme, e.g. `LAW.P.B167`.
static POLE_NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}\.P\.[A-Z]\d{3}$").expect("valid pole number pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-level validation finding, reported back to the submitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldIssue {
    pub field: String,
    pub rule: String,
    pub message: String,
    pub severity: Severity,
}

impl FieldIssue {
    pub fn error(field: &str, rule: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule: rule.to_string(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(field: &str, rule: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            rule: rule.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

pub fn is_valid_pole_number(value: &str) -> bool {
    POLE_NUMBER_PATTERN.is_match(value)
}

pub fn require_non_empty(issues: &mut Vec<FieldIssue>, field: &str, value: &str) {
    if value.trim().is_empty() {
        issues.push(FieldIssue::error(field, "required", format!("{field} is required")));
    }
}

/// Latitude/longitude sanity check. A (0, 0) fix is treated as a failed
/// receiver read rather than a real position.
pub fn is_plausible_coordinate(latitude: f64, longitude: f64) -> bool {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return false;
    }
    latitude != 0.0 || longitude != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pole_number_format_accepts_scheme() {
        assert!(is_valid_pole_number("LAW.P.B167"));
        assert!(is_valid_pole_number("MOH.P.A001"));
    }

    #[test]
    fn pole_number_format_rejects_variants() {
        assert!(!is_valid_pole_number("LAW.P.167"));
        assert!(!is_valid_pole_number("law.p.b167"));
        assert!(!is_valid_pole_number("LAWP.B167"));
        assert!(!is_valid_pole_number(""));
    }

    #[test]
    fn coordinate_plausibility() {
        assert!(is_plausible_coordinate(-26.2041, 28.0473));
        assert!(!is_plausible_coordinate(0.0, 0.0));
        assert!(!is_plausible_coordinate(91.0, 10.0));
        assert!(!is_plausible_coordinate(10.0, -181.0));
    }

    #[test]
    fn require_non_empty_records_issue() {
        let mut issues = Vec::new();
        require_non_empty(&mut issues, "pole_number", "  ");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule, "required");
        assert_eq!(issues[0].severity, Severity::Error);
    }
}
