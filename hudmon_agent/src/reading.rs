//! A single normalized metric value, or the explicit "unavailable" marker.
//!
//! On the wire a reading is a JSON string (`"45.0"`, `"8.00 GB"`), a JSON
//! number (core counts), or the literal string `"N/A"`. `N/A` is never a
//! number, so a viewer can tell "0% utilization" apart from "sensor missing".

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Literal used on the wire for [`Reading::Unavailable`].
pub const UNAVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reading {
    /// Formatted display value, possibly unit-suffixed.
    Text(String),
    /// Integral value such as a core count.
    Count(u64),
    #[default]
    Unavailable,
}

impl Reading {
    pub fn text(s: impl Into<String>) -> Self {
        Reading::Text(s.into())
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Reading::Unavailable)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Text(s) => f.write_str(s),
            Reading::Count(n) => write!(f, "{n}"),
            Reading::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

impl<T> From<Option<T>> for Reading
where
    T: Into<Reading>,
{
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Reading::Unavailable)
    }
}

impl From<String> for Reading {
    fn from(s: String) -> Self {
        Reading::Text(s)
    }
}

impl From<u64> for Reading {
    fn from(n: u64) -> Self {
        Reading::Count(n)
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Text(s) => serializer.serialize_str(s),
            Reading::Count(n) => serializer.serialize_u64(*n),
            Reading::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

struct ReadingVisitor;

impl Visitor<'_> for ReadingVisitor {
    type Value = Reading;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a display string, a non-negative integer, or \"N/A\"")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Reading, E> {
        if v == UNAVAILABLE {
            Ok(Reading::Unavailable)
        } else {
            Ok(Reading::Text(v.to_owned()))
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Reading, E> {
        Ok(Reading::Count(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Reading, E> {
        u64::try_from(v)
            .map(Reading::Count)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Reading, E> {
        Ok(Reading::Unavailable)
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ReadingVisitor)
    }
}
