//! Element kinds carried by a [`Stream`](super::Stream)

use crate::error::{Result, SigstreamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primitive element kind of a stream
///
/// Names print and parse in upper case (`FLOAT`, `DOUBLE`, ...), which is
/// the spelling used by model descriptor files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleType {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    #[default]
    Float,
    Double,
    /// Opaque fixed-width records; the width is carried by the stream
    Custom,
}

impl SampleType {
    /// Size of one element in bytes
    ///
    /// Returns `None` for [`SampleType::Custom`], whose width is declared by
    /// the stream itself.
    pub fn size(&self) -> Option<usize> {
        match self {
            SampleType::Bool | SampleType::Byte => Some(1),
            SampleType::Char | SampleType::Short => Some(2),
            SampleType::Int | SampleType::Float => Some(4),
            SampleType::Long | SampleType::Double => Some(8),
            SampleType::Custom => None,
        }
    }

    /// Upper-case name as written in descriptor files
    pub fn name(&self) -> &'static str {
        match self {
            SampleType::Bool => "BOOL",
            SampleType::Byte => "BYTE",
            SampleType::Char => "CHAR",
            SampleType::Short => "SHORT",
            SampleType::Int => "INT",
            SampleType::Long => "LONG",
            SampleType::Float => "FLOAT",
            SampleType::Double => "DOUBLE",
            SampleType::Custom => "CUSTOM",
        }
    }

    /// True for FLOAT and DOUBLE
    pub fn is_floating(&self) -> bool {
        matches!(self, SampleType::Float | SampleType::Double)
    }

    /// True for every kind that converts losslessly enough to `f64`
    pub fn is_numeric(&self) -> bool {
        !matches!(self, SampleType::Custom)
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleType {
    type Err = SigstreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Ok(SampleType::Bool),
            "BYTE" | "UCHAR" => Ok(SampleType::Byte),
            "CHAR" => Ok(SampleType::Char),
            "SHORT" => Ok(SampleType::Short),
            "INT" => Ok(SampleType::Int),
            "LONG" => Ok(SampleType::Long),
            "FLOAT" => Ok(SampleType::Float),
            "DOUBLE" => Ok(SampleType::Double),
            "CUSTOM" | "STRUCT" => Ok(SampleType::Custom),
            other => Err(SigstreamError::InvalidParameter {
                param: "type".to_string(),
                value: other.to_string(),
                expected: "BOOL, BYTE, CHAR, SHORT, INT, LONG, FLOAT, DOUBLE or CUSTOM".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(SampleType::Float.size(), Some(4));
        assert_eq!(SampleType::Double.size(), Some(8));
        assert_eq!(SampleType::Char.size(), Some(2));
        assert_eq!(SampleType::Custom.size(), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("FLOAT".parse::<SampleType>().unwrap(), SampleType::Float);
        assert_eq!("double".parse::<SampleType>().unwrap(), SampleType::Double);
        assert!("COMPLEX".parse::<SampleType>().is_err());

        for kind in [SampleType::Bool, SampleType::Long, SampleType::Custom] {
            assert_eq!(kind.to_string().parse::<SampleType>().unwrap(), kind);
        }
    }
}
