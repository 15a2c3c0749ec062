use once_cell::sync::Lazy;
use regex::Regex;

use crate::expr::{DbType, SqlType};

static TYPE_DECLARATION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z_][A-Za-z0-9_ ]*?)\s*(?:\(\s*(\d+|max)\s*(?:,\s*(\d+)\s*)?\))?\s*(not\s+null)?\s*$").ok()
});

/// A dialect-native spelling for one portable type. `facets` says whether
/// length/precision are still written after the renamed type.
#[derive(Debug, Clone)]
pub struct TypeRename {
    pub db_type: DbType,
    pub name: &'static str,
    pub facets: bool,
}

const fn rename(db_type: DbType, name: &'static str, facets: bool) -> TypeRename {
    TypeRename { db_type, name, facets }
}

/// Maps portable column types onto one dialect's declaration syntax.
/// Types without an entry are written under their portable name; custom
/// names pass through untouched.
#[derive(Debug, Clone, Copy)]
pub struct TypeSystem {
    renames: &'static [TypeRename],
}

pub const SQL_SERVER_TYPES: TypeSystem = TypeSystem { renames: &[] };

pub const SQL_SERVER_CE_TYPES: TypeSystem = TypeSystem {
    renames: &[
        rename(DbType::VarChar, "NVARCHAR", true),
        rename(DbType::Char, "NCHAR", true),
        rename(DbType::Text, "NTEXT", false),
        rename(DbType::Date, "DATETIME", false),
        rename(DbType::Time, "DATETIME", false),
    ],
};

pub const MYSQL_TYPES: TypeSystem = TypeSystem {
    renames: &[
        rename(DbType::NVarChar, "VARCHAR", true),
        rename(DbType::NChar, "CHAR", true),
        rename(DbType::NText, "TEXT", false),
        rename(DbType::Money, "DECIMAL", true),
        rename(DbType::Image, "LONGBLOB", false),
        rename(DbType::UniqueIdentifier, "CHAR(36)", false),
    ],
};

pub const ORACLE_TYPES: TypeSystem = TypeSystem {
    renames: &[
        rename(DbType::NVarChar, "NVARCHAR2", true),
        rename(DbType::VarChar, "VARCHAR2", true),
        rename(DbType::Int, "NUMBER(10)", false),
        rename(DbType::BigInt, "NUMBER(19)", false),
        rename(DbType::SmallInt, "NUMBER(5)", false),
        rename(DbType::TinyInt, "NUMBER(3)", false),
        rename(DbType::Bit, "NUMBER(1)", false),
        rename(DbType::Decimal, "NUMBER", true),
        rename(DbType::Money, "NUMBER(19,4)", false),
        rename(DbType::Float, "BINARY_DOUBLE", false),
        rename(DbType::Real, "BINARY_FLOAT", false),
        rename(DbType::DateTime, "DATE", false),
        rename(DbType::Text, "CLOB", false),
        rename(DbType::NText, "NCLOB", false),
        rename(DbType::Image, "BLOB", false),
        rename(DbType::VarBinary, "RAW", true),
        rename(DbType::UniqueIdentifier, "RAW(16)", false),
    ],
};

pub const SQLITE_TYPES: TypeSystem = TypeSystem {
    renames: &[
        rename(DbType::BigInt, "INTEGER", false),
        rename(DbType::Int, "INTEGER", false),
        rename(DbType::SmallInt, "INTEGER", false),
        rename(DbType::TinyInt, "INTEGER", false),
        rename(DbType::Bit, "INTEGER", false),
        rename(DbType::Decimal, "NUMERIC", false),
        rename(DbType::Money, "NUMERIC", false),
        rename(DbType::Float, "REAL", false),
        rename(DbType::Real, "REAL", false),
        rename(DbType::Char, "TEXT", false),
        rename(DbType::NChar, "TEXT", false),
        rename(DbType::VarChar, "TEXT", false),
        rename(DbType::NVarChar, "TEXT", false),
        rename(DbType::NText, "TEXT", false),
        rename(DbType::Binary, "BLOB", false),
        rename(DbType::VarBinary, "BLOB", false),
        rename(DbType::Image, "BLOB", false),
        rename(DbType::UniqueIdentifier, "TEXT", false),
    ],
};

pub const ACCESS_TYPES: TypeSystem = TypeSystem {
    renames: &[
        rename(DbType::Decimal, "CURRENCY", false),
        rename(DbType::Money, "CURRENCY", false),
        rename(DbType::Int, "INTEGER", false),
        rename(DbType::BigInt, "DECIMAL", false),
        rename(DbType::TinyInt, "BYTE", false),
        rename(DbType::Float, "DOUBLE", false),
        rename(DbType::Real, "SINGLE", false),
        rename(DbType::NVarChar, "TEXT", true),
        rename(DbType::VarChar, "TEXT", true),
        rename(DbType::NChar, "TEXT", true),
        rename(DbType::Char, "TEXT", true),
        rename(DbType::Text, "MEMO", false),
        rename(DbType::NText, "MEMO", false),
        rename(DbType::Image, "LONGBINARY", false),
        rename(DbType::UniqueIdentifier, "GUID", false),
    ],
};

impl TypeSystem {
    fn lookup(&self, db_type: &DbType) -> Option<&TypeRename> {
        self.renames.iter().find(|r| &r.db_type == db_type)
    }

    /// Column type as written in this dialect, e.g. `NVARCHAR(40)`.
    pub fn format(&self, ty: &SqlType) -> String {
        let (mut name, facets) = match (&ty.db_type, self.lookup(&ty.db_type)) {
            (DbType::Custom(custom), _) => (custom.clone(), true),
            (_, Some(r)) => (r.name.to_string(), r.facets),
            (db_type, None) => (db_type.name().to_uppercase(), true),
        };
        if facets {
            if ty.db_type.takes_length() {
                if let Some(len) = ty.length {
                    name.push_str(&format!("({len})"));
                }
            } else if ty.db_type.takes_precision() {
                match (ty.precision, ty.scale) {
                    (Some(p), Some(s)) => name.push_str(&format!("({p},{s})")),
                    (Some(p), None) => name.push_str(&format!("({p})")),
                    _ => {}
                }
            } else if let DbType::Custom(_) = ty.db_type {
                if let Some(len) = ty.length {
                    name.push_str(&format!("({len})"));
                }
            }
        }
        if ty.not_null {
            name.push_str(" NOT NULL");
        }
        name
    }

    /// Parse a declaration such as `nvarchar(40) not null`. Unknown type
    /// names are kept as `DbType::Custom`.
    pub fn parse(&self, declaration: &str) -> SqlType {
        let Some(caps) = TYPE_DECLARATION.as_ref().and_then(|re| re.captures(declaration)) else {
            return SqlType::new(DbType::Custom(declaration.trim().to_string()));
        };
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let db_type = self
            .renames
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.db_type.clone())
            .unwrap_or_else(|| DbType::from_name(name));
        let mut ty = SqlType::new(db_type);
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u8>().ok());
        if ty.db_type.takes_precision() {
            ty.precision = first.and_then(|p| u8::try_from(p).ok());
            ty.scale = second;
        } else {
            ty.length = first;
        }
        ty.not_null = caps.get(4).is_some();
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portable_names_are_uppercased() {
        assert_eq!(SQL_SERVER_TYPES.format(&SqlType::nvarchar(40).not_null()), "NVARCHAR(40) NOT NULL");
        assert_eq!(SQL_SERVER_TYPES.format(&SqlType::decimal(18, 2)), "DECIMAL(18,2)");
    }

    #[test]
    fn dialect_renames_apply() {
        assert_eq!(ACCESS_TYPES.format(&SqlType::decimal(18, 2)), "CURRENCY");
        assert_eq!(SQLITE_TYPES.format(&SqlType::big_int()), "INTEGER");
        assert_eq!(ORACLE_TYPES.format(&SqlType::nvarchar(10)), "NVARCHAR2(10)");
        assert_eq!(MYSQL_TYPES.format(&SqlType::nvarchar(10)), "VARCHAR(10)");
    }

    #[test]
    fn custom_names_pass_through() {
        let ty = SqlType::new(DbType::Custom("GEOGRAPHY".into()));
        assert_eq!(SQL_SERVER_TYPES.format(&ty), "GEOGRAPHY");
        let parsed = SQL_SERVER_TYPES.parse("hierarchyid");
        assert_eq!(parsed.db_type, DbType::Custom("hierarchyid".into()));
    }

    #[test]
    fn parse_reads_facets() {
        let ty = SQL_SERVER_TYPES.parse("nvarchar(40) not null");
        assert_eq!(ty, SqlType::nvarchar(40).not_null());
        let ty = SQL_SERVER_TYPES.parse("DECIMAL(10, 3)");
        assert_eq!(ty, SqlType::decimal(10, 3));
        assert_eq!(ACCESS_TYPES.parse("currency").db_type, DbType::Decimal);
    }
}
