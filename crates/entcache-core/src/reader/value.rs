use std::fmt;

use chrono::{DateTime, Utc};

/// The kind of value a field holds, independent of nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Int => write!(f, "int"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Text => write!(f, "text"),
            FieldKind::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A dynamically typed field value, used for filtering and tabular I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render the value the way it is written to a tabular cell.
    /// Null renders as the empty string.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(x) => x.to_string(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    /// Case-insensitive substring test used for non-exact text filtering.
    pub(crate) fn contains_ignore_case(&self, needle: &FieldValue) -> bool {
        self.to_text()
            .to_lowercase()
            .contains(&needle.to_text().to_lowercase())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl<T: FieldType> From<T> for FieldValue {
    fn from(value: T) -> Self {
        value.to_value()
    }
}

/// A Rust type that can be stored in an entity field.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> FieldValue;

    fn from_value(value: FieldValue) -> Result<Self, String>;

    /// Parse a tabular cell.
    fn parse_text(text: &str) -> Result<Self, String>;
}

fn mismatch<T>(expected: FieldKind, got: &FieldValue) -> Result<T, String> {
    Err(format!("expected {} value, got {:?}", expected, got))
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_value(value: FieldValue) -> Result<Self, String> {
        match value {
            FieldValue::Bool(b) => Ok(b),
            FieldValue::Text(s) => Self::parse_text(&s),
            other => mismatch(Self::KIND, &other),
        }
    }

    fn parse_text(text: &str) -> Result<Self, String> {
        match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        }
    }
}

macro_rules! int_field_type {
    ($($ty:ty),*) => {
        $(
            impl FieldType for $ty {
                const KIND: FieldKind = FieldKind::Int;

                fn to_value(&self) -> FieldValue {
                    FieldValue::Int(i64::from(*self))
                }

                fn from_value(value: FieldValue) -> Result<Self, String> {
                    match value {
                        FieldValue::Int(i) => <$ty>::try_from(i).map_err(|e| e.to_string()),
                        FieldValue::Text(s) => Self::parse_text(&s),
                        other => mismatch(Self::KIND, &other),
                    }
                }

                fn parse_text(text: &str) -> Result<Self, String> {
                    text.trim().parse::<$ty>().map_err(|e| format!("'{}': {}", text, e))
                }
            }
        )*
    };
}

int_field_type!(i32, i64, u32);

impl FieldType for f64 {
    const KIND: FieldKind = FieldKind::Float;

    fn to_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }

    fn from_value(value: FieldValue) -> Result<Self, String> {
        match value {
            FieldValue::Float(x) => Ok(x),
            FieldValue::Int(i) => Ok(i as f64),
            FieldValue::Text(s) => Self::parse_text(&s),
            other => mismatch(Self::KIND, &other),
        }
    }

    fn parse_text(text: &str) -> Result<Self, String> {
        text.trim().parse::<f64>().map_err(|e| format!("'{}': {}", text, e))
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_value(&self) -> FieldValue {
        FieldValue::Text(self.clone())
    }

    fn from_value(value: FieldValue) -> Result<Self, String> {
        match value {
            FieldValue::Null => mismatch(Self::KIND, &FieldValue::Null),
            other => Ok(other.to_text()),
        }
    }

    fn parse_text(text: &str) -> Result<Self, String> {
        Ok(text.to_string())
    }
}

impl FieldType for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn to_value(&self) -> FieldValue {
        FieldValue::Timestamp(*self)
    }

    fn from_value(value: FieldValue) -> Result<Self, String> {
        match value {
            FieldValue::Timestamp(ts) => Ok(ts),
            FieldValue::Text(s) => Self::parse_text(&s),
            other => mismatch(Self::KIND, &other),
        }
    }

    fn parse_text(text: &str) -> Result<Self, String> {
        DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("'{}': {}", text, e))
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> FieldValue {
        match self {
            Some(v) => v.to_value(),
            None => FieldValue::Null,
        }
    }

    fn from_value(value: FieldValue) -> Result<Self, String> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn parse_text(text: &str) -> Result<Self, String> {
        if text.is_empty() {
            Ok(None)
        } else {
            T::parse_text(text).map(Some)
        }
    }
}
