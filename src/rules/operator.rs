//! Operator registry shared by both rule dialects.
//!
//! Stored rules spell operators two ways: SCREAMING_CASE (`GREATER_THAN`) in the
//! flat dialect and camelCase (`greaterThan`, `greaterThanInclusive`) in the nested
//! one. Every alias maps to a single canonical variant here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    In,
    NotIn,
    /// Exact member of an array fact.
    Contains,
    DoesNotContain,
    ContainsCaseInsensitive,
    ZScoreGreaterThan,
    /// Unknown name, kept for diagnostics. Always evaluates to `false`.
    Unsupported(String),
}

impl Operator {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "EQUALS" | "equal" | "equals" => Operator::Equals,
            "NOT_EQUALS" | "notEqual" | "notEquals" => Operator::NotEquals,
            "GREATER_THAN" | "greaterThan" => Operator::GreaterThan,
            "LESS_THAN" | "lessThan" => Operator::LessThan,
            "GREATER_THAN_OR_EQUALS" | "greaterThanInclusive" | "greaterThanOrEquals" => {
                Operator::GreaterThanOrEquals
            }
            "LESS_THAN_OR_EQUALS" | "lessThanInclusive" | "lessThanOrEquals" => {
                Operator::LessThanOrEquals
            }
            "IN" | "in" => Operator::In,
            "NOT_IN" | "notIn" => Operator::NotIn,
            "CONTAINS" | "contains" => Operator::Contains,
            "DOES_NOT_CONTAIN" | "doesNotContain" => Operator::DoesNotContain,
            "containsCaseInsensitive" | "CONTAINS_CASE_INSENSITIVE" => {
                Operator::ContainsCaseInsensitive
            }
            "z-score-greater-than" | "Z_SCORE_GREATER_THAN" => Operator::ZScoreGreaterThan,
            other => Operator::Unsupported(other.to_string()),
        }
    }

    /// Canonical spelling, used when serializing normalized rules.
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::NotEquals => "NOT_EQUALS",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::LessThan => "LESS_THAN",
            Operator::GreaterThanOrEquals => "GREATER_THAN_OR_EQUALS",
            Operator::LessThanOrEquals => "LESS_THAN_OR_EQUALS",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::Contains => "CONTAINS",
            Operator::DoesNotContain => "DOES_NOT_CONTAIN",
            Operator::ContainsCaseInsensitive => "containsCaseInsensitive",
            Operator::ZScoreGreaterThan => "z-score-greater-than",
            Operator::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Operator::Unsupported(_))
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        Operator::parse(&s)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_share_variant() {
        assert_eq!(Operator::parse("GREATER_THAN"), Operator::parse("greaterThan"));
        assert_eq!(Operator::parse("equal"), Operator::Equals);
        assert_eq!(Operator::parse("greaterThanInclusive"), Operator::GreaterThanOrEquals);
        assert_eq!(Operator::parse("z-score-greater-than"), Operator::ZScoreGreaterThan);
        assert_eq!(Operator::parse("contains"), Operator::Contains);
        assert_eq!(Operator::parse("doesNotContain"), Operator::DoesNotContain);
    }

    #[test]
    fn test_unknown_kept() {
        let op = Operator::parse("between");
        assert_eq!(op, Operator::Unsupported("between".to_string()));
        assert!(!op.is_supported());
        assert_eq!(op.as_str(), "between");
    }

    #[test]
    fn test_serde_canonicalizes() {
        let op: Operator = serde_json::from_str("\"lessThanInclusive\"").unwrap();
        assert_eq!(op, Operator::LessThanOrEquals);
        assert_eq!(serde_json::to_string(&op).unwrap(), "\"LESS_THAN_OR_EQUALS\"");
    }
}
