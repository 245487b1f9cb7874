//! Declared node parameters and per-value checks.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Declaration of one configurable parameter on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name, the key in [`NodeDefinition::parameters`](crate::NodeDefinition::parameters).
    pub name: String,
    /// Accepted value kind.
    pub kind: ParameterKind,
    /// Whether a value (or a default) must be present.
    #[serde(default)]
    pub required: bool,
    /// Value used when the node does not set one.
    #[serde(default)]
    pub default: Option<Value>,
    /// Additional constraints on the value.
    #[serde(default)]
    pub rules: ParameterRules,
}

/// Value kind accepted by a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    /// A string.
    Text,
    /// A JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// One of a fixed set of strings.
    Choice {
        /// The allowed values.
        options: Vec<String>,
    },
    /// A non-empty path string.
    File,
    /// `YYYY-MM-DD` or an RFC 3339 timestamp.
    Date,
    /// Any JSON value.
    Json,
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Choice { .. } => write!(f, "choice"),
            Self::File => write!(f, "file"),
            Self::Date => write!(f, "date"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Optional bounds applied after the kind check.
///
/// Length rules apply to text-like values (counted in characters), value
/// rules to numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterRules {
    /// Minimum string length.
    #[serde(default)]
    pub min_length: Option<usize>,
    /// Maximum string length.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Minimum numeric value (inclusive).
    #[serde(default)]
    pub min_value: Option<f64>,
    /// Maximum numeric value (inclusive).
    #[serde(default)]
    pub max_value: Option<f64>,
}

/// Why a parameter value was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterIssue {
    /// Required and neither set nor defaulted.
    #[error("required parameter is missing")]
    Missing,
    /// The value has the wrong JSON shape.
    #[error("expected a {expected} value")]
    WrongKind {
        /// The declared kind.
        expected: String,
    },
    /// Not one of the declared choices.
    #[error("`{value}` is not one of the allowed options")]
    UnknownChoice {
        /// The rejected value.
        value: String,
    },
    /// Shorter than `min_length`.
    #[error("length {actual} is below the minimum of {min}")]
    TooShort {
        /// Configured minimum.
        min: usize,
        /// Observed length.
        actual: usize,
    },
    /// Longer than `max_length`.
    #[error("length {actual} exceeds the maximum of {max}")]
    TooLong {
        /// Configured maximum.
        max: usize,
        /// Observed length.
        actual: usize,
    },
    /// Smaller than `min_value`.
    #[error("{actual} is below the minimum of {min}")]
    BelowMinimum {
        /// Configured minimum.
        min: f64,
        /// Observed value.
        actual: f64,
    },
    /// Larger than `max_value`.
    #[error("{actual} exceeds the maximum of {max}")]
    AboveMaximum {
        /// Configured maximum.
        max: f64,
        /// Observed value.
        actual: f64,
    },
}

impl ParameterSpec {
    /// Declare a parameter with no default and no rules.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            rules: ParameterRules::default(),
        }
    }

    /// Mark the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Set the value rules.
    #[must_use]
    pub fn with_rules(mut self, rules: ParameterRules) -> Self {
        self.rules = rules;
        self
    }

    /// The value a node effectively runs with: its own, else the default.
    #[must_use]
    pub fn effective<'a>(&'a self, value: Option<&'a Value>) -> Option<&'a Value> {
        value.or(self.default.as_ref())
    }

    /// Check a node's value for this parameter.
    ///
    /// An absent value is accepted when the parameter is optional or has a
    /// default; an explicit JSON `null` is treated as absent.
    pub fn check(&self, value: Option<&Value>) -> Result<(), ParameterIssue> {
        let value = value.filter(|v| !v.is_null());
        let Some(value) = self.effective(value) else {
            return if self.required {
                Err(ParameterIssue::Missing)
            } else {
                Ok(())
            };
        };

        self.check_kind(value)?;
        self.check_rules(value)
    }

    fn check_kind(&self, value: &Value) -> Result<(), ParameterIssue> {
        let ok = match &self.kind {
            ParameterKind::Text => value.is_string(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Choice { options } => {
                let Some(s) = value.as_str() else {
                    return Err(self.wrong_kind());
                };
                if !options.iter().any(|o| o == s) {
                    return Err(ParameterIssue::UnknownChoice {
                        value: s.to_owned(),
                    });
                }
                true
            }
            ParameterKind::File => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            ParameterKind::Date => value.as_str().is_some_and(is_date),
            ParameterKind::Json => true,
        };
        if ok { Ok(()) } else { Err(self.wrong_kind()) }
    }

    fn check_rules(&self, value: &Value) -> Result<(), ParameterIssue> {
        let rules = &self.rules;
        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min) = rules.min_length
                && len < min
            {
                return Err(ParameterIssue::TooShort { min, actual: len });
            }
            if let Some(max) = rules.max_length
                && len > max
            {
                return Err(ParameterIssue::TooLong { max, actual: len });
            }
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = rules.min_value
                && n < min
            {
                return Err(ParameterIssue::BelowMinimum { min, actual: n });
            }
            if let Some(max) = rules.max_value
                && n > max
            {
                return Err(ParameterIssue::AboveMaximum { max, actual: n });
            }
        }
        Ok(())
    }

    fn wrong_kind(&self) -> ParameterIssue {
        ParameterIssue::WrongKind {
            expected: self.kind.to_string(),
        }
    }
}

fn is_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}
