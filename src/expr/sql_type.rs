use std::fmt;

use serde::{Deserialize, Serialize};

/// Portable column types. Dialects map these to their own spelling through
/// their `TypeSystem`; `Custom` carries a dialect-native name verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    BigInt,
    Int,
    SmallInt,
    TinyInt,
    Bit,
    Decimal,
    Money,
    Float,
    Real,
    Char,
    NChar,
    VarChar,
    NVarChar,
    Text,
    NText,
    Date,
    DateTime,
    Time,
    Binary,
    VarBinary,
    Image,
    UniqueIdentifier,
    Custom(String),
}

const NAMED: [(DbType, &str); 22] = [
    (DbType::BigInt, "BigInt"),
    (DbType::Int, "Int"),
    (DbType::SmallInt, "SmallInt"),
    (DbType::TinyInt, "TinyInt"),
    (DbType::Bit, "Bit"),
    (DbType::Decimal, "Decimal"),
    (DbType::Money, "Money"),
    (DbType::Float, "Float"),
    (DbType::Real, "Real"),
    (DbType::Char, "Char"),
    (DbType::NChar, "NChar"),
    (DbType::VarChar, "VarChar"),
    (DbType::NVarChar, "NVarChar"),
    (DbType::Text, "Text"),
    (DbType::NText, "NText"),
    (DbType::Date, "Date"),
    (DbType::DateTime, "DateTime"),
    (DbType::Time, "Time"),
    (DbType::Binary, "Binary"),
    (DbType::VarBinary, "VarBinary"),
    (DbType::Image, "Image"),
    (DbType::UniqueIdentifier, "UniqueIdentifier"),
];

impl DbType {
    pub fn name(&self) -> &str {
        match self {
            DbType::Custom(name) => name,
            other => NAMED
                .iter()
                .find(|(t, _)| t == other)
                .map(|(_, n)| *n)
                .unwrap_or("Custom"),
        }
    }

    /// Case-insensitive lookup of a portable type name; anything else is kept
    /// as a custom name.
    pub fn from_name(name: &str) -> DbType {
        NAMED
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(t, _)| t.clone())
            .unwrap_or_else(|| DbType::Custom(name.to_string()))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DbType::BigInt
                | DbType::Int
                | DbType::SmallInt
                | DbType::TinyInt
                | DbType::Decimal
                | DbType::Money
                | DbType::Float
                | DbType::Real
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            DbType::Char | DbType::NChar | DbType::VarChar | DbType::NVarChar | DbType::Text | DbType::NText
        )
    }

    pub fn takes_length(&self) -> bool {
        matches!(
            self,
            DbType::Char | DbType::NChar | DbType::VarChar | DbType::NVarChar | DbType::Binary | DbType::VarBinary
        )
    }

    pub fn takes_precision(&self) -> bool {
        matches!(self, DbType::Decimal)
    }
}

/// A declared column type: portable type plus size facets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlType {
    pub db_type: DbType,
    pub not_null: bool,
    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl SqlType {
    pub fn new(db_type: DbType) -> Self {
        Self { db_type, not_null: false, length: None, precision: None, scale: None }
    }

    pub fn int() -> Self {
        Self::new(DbType::Int)
    }

    pub fn big_int() -> Self {
        Self::new(DbType::BigInt)
    }

    pub fn bit() -> Self {
        Self::new(DbType::Bit)
    }

    pub fn float() -> Self {
        Self::new(DbType::Float)
    }

    pub fn date_time() -> Self {
        Self::new(DbType::DateTime)
    }

    pub fn nvarchar(length: u32) -> Self {
        Self::new(DbType::NVarChar).with_length(length)
    }

    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self { precision: Some(precision), scale: Some(scale), ..Self::new(DbType::Decimal) }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.not_null = false;
        self
    }
}

impl Default for SqlType {
    fn default() -> Self {
        SqlType::new(DbType::NVarChar)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.db_type.name())?;
        match (self.length, self.precision, self.scale) {
            (Some(len), _, _) => write!(f, "({len})")?,
            (None, Some(p), Some(s)) => write!(f, "({p},{s})")?,
            (None, Some(p), None) => write!(f, "({p})")?,
            _ => {}
        }
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_case_insensitively() {
        assert_eq!(DbType::from_name("nvarchar"), DbType::NVarChar);
        assert_eq!(DbType::NVarChar.name(), "NVarChar");
        assert_eq!(DbType::from_name("GEOGRAPHY"), DbType::Custom("GEOGRAPHY".into()));
    }

    #[test]
    fn display_includes_facets() {
        assert_eq!(SqlType::nvarchar(40).not_null().to_string(), "NVarChar(40) NOT NULL");
        assert_eq!(SqlType::decimal(18, 2).to_string(), "Decimal(18,2)");
        assert_eq!(SqlType::int().to_string(), "Int");
    }
}
