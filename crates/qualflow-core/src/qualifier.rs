//! Type qualifiers
//!
//! A qualifier is an immutable tag such as `@Det` or `@PolyDet("up")`. The base name
//! places it in a hierarchy; the payload carries associated data (method lists,
//! conversion categories, constant values, dependent expressions).

use crate::checkers::format::ConversionCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data attached to a qualifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Payload {
    #[default]
    Unit,
    Str(String),
    Strings(Vec<String>),
    Categories(Vec<ConversionCategory>),
    Ints(Vec<i64>),
}

impl Payload {
    pub fn is_unit(&self) -> bool {
        matches!(self, Payload::Unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qualifier {
    name: String,
    #[serde(default, skip_serializing_if = "Payload::is_unit")]
    payload: Payload,
}

impl Qualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Unit,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn with_str(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_payload(name, Payload::Str(value.into()))
    }

    pub fn with_strings<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_payload(
            name,
            Payload::Strings(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// True when both qualifiers share a base name, whatever their payloads
    pub fn same_name(&self, other: &Qualifier) -> bool {
        self.name == other.name
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn without_payload(&self) -> Qualifier {
        Qualifier::new(self.name.clone())
    }

    pub fn str_value(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String-list payload, empty for any other payload kind
    pub fn strings(&self) -> &[String] {
        match &self.payload {
            Payload::Strings(v) => v,
            _ => &[],
        }
    }

    pub fn categories(&self) -> &[ConversionCategory] {
        match &self.payload {
            Payload::Categories(v) => v,
            _ => &[],
        }
    }

    pub fn ints(&self) -> &[i64] {
        match &self.payload {
            Payload::Ints(v) => v,
            _ => &[],
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        match &self.payload {
            Payload::Unit => Ok(()),
            Payload::Str(s) => write!(f, "(\"{}\")", s),
            Payload::Strings(values) => {
                let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v)).collect();
                write!(f, "({{{}}})", quoted.join(", "))
            }
            Payload::Categories(cats) => {
                let names: Vec<String> = cats.iter().map(ToString::to_string).collect();
                write!(f, "({{{}}})", names.join(", "))
            }
            Payload::Ints(values) => {
                let names: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "({{{}}})", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!(Qualifier::new("Det").to_string(), "@Det");
        assert_eq!(Qualifier::with_str("PolyDet", "up").to_string(), "@PolyDet(\"up\")");
        assert_eq!(
            Qualifier::with_strings("MustCallOnElements", ["close", "flush"]).to_string(),
            "@MustCallOnElements({\"close\", \"flush\"})"
        );
        assert_eq!(
            Qualifier::with_payload(
                "Format",
                Payload::Categories(vec![ConversionCategory::General, ConversionCategory::Int])
            )
            .to_string(),
            "@Format({GENERAL, INT})"
        );
    }

    #[test]
    fn test_same_name_ignores_payload() {
        let up = Qualifier::with_str("PolyDet", "up");
        let down = Qualifier::with_str("PolyDet", "down");
        assert!(up.same_name(&down));
        assert_ne!(up, down);
        assert_eq!(up.without_payload(), Qualifier::new("PolyDet"));
    }

    #[test]
    fn test_unit_payload_is_not_serialized() {
        let json = serde_json::to_string(&Qualifier::new("Det")).unwrap();
        assert_eq!(json, r#"{"name":"Det"}"#);
        let back: Qualifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Qualifier::new("Det"));
    }
}
