use crate::config::DialectKind;
use crate::dialect::{FormatterConfig, Language, SQLITE_TYPES, TypeSystem};
use crate::error::Result;
use crate::expr::{Expr, ExprRef};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteLanguage;

impl Language for SqliteLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn type_system(&self) -> &TypeSystem {
        &SQLITE_TYPES
    }

    fn generated_id_expression(&self) -> Result<ExprRef> {
        Ok(Expr::bare_function("last_insert_rowid()"))
    }

    fn rows_affected_expression(&self) -> Option<ExprRef> {
        Some(Expr::bare_function("changes()"))
    }

    fn allows_subquery_in_select_without_from(&self) -> bool {
        true
    }

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::LimitStyle;

    #[test]
    fn limit_offset_paging() {
        assert_eq!(SqliteLanguage.formatter_config().limit, LimitStyle::LimitOffset);
        assert!(!SqliteLanguage.supports_apply());
    }
}
