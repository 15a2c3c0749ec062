use crate::config::DialectKind;
use crate::dialect::tsql::SQL_SERVER_FUNCTIONS;
use crate::dialect::{ConcatStyle, FormatterConfig, Language, LimitStyle, SQL_SERVER_CE_TYPES, TypeSystem};
use crate::error::Result;
use crate::expr::{Expr, ExprRef};

/// SQL Server Compact Edition: T-SQL syntax, one statement per command.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerCeLanguage;

impl Language for SqlServerCeLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServerCe
    }

    fn type_system(&self) -> &TypeSystem {
        &SQL_SERVER_CE_TYPES
    }

    fn generated_id_expression(&self) -> Result<ExprRef> {
        Ok(Expr::bare_function("@@IDENTITY"))
    }

    fn supports_apply(&self) -> bool {
        true
    }

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            limit: LimitStyle::OffsetFetch,
            concat: ConcatStyle::Plus,
            functions: SQL_SERVER_FUNCTIONS,
            unicode_strings: true,
            ..FormatterConfig::STANDARD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_statement_dialect() {
        let lang = SqlServerCeLanguage;
        assert!(!lang.allows_multiple_commands());
        assert!(!lang.allows_subquery_in_select_without_from());
        assert!(lang.rows_affected_expression().is_none());
    }
}
