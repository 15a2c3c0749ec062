use crate::config::DialectKind;
use crate::dialect::{ConcatStyle, FormatterConfig, FunctionNames, Language, LimitStyle, MYSQL_TYPES, TypeSystem};
use crate::error::Result;
use crate::expr::{Expr, ExprRef};

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlLanguage;

impl Language for MySqlLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn type_system(&self) -> &TypeSystem {
        &MYSQL_TYPES
    }

    fn quote(&self, name: &str) -> String {
        if name.len() > 1 && name.starts_with('`') && name.ends_with('`') {
            name.to_string()
        } else {
            format!("`{name}`")
        }
    }

    fn generated_id_expression(&self) -> Result<ExprRef> {
        Ok(Expr::bare_function("LAST_INSERT_ID()"))
    }

    fn rows_affected_expression(&self) -> Option<ExprRef> {
        Some(Expr::bare_function("ROW_COUNT()"))
    }

    fn allows_subquery_in_select_without_from(&self) -> bool {
        true
    }

    fn allows_distinct_in_aggregates(&self) -> bool {
        true
    }

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            parameter_prefix: "?",
            limit: LimitStyle::Limit,
            concat: ConcatStyle::Function,
            functions: FunctionNames {
                length: "CHAR_LENGTH",
                substring: "SUBSTRING",
                ceiling: "CEILING",
                ..FormatterConfig::STANDARD.functions
            },
            ..FormatterConfig::STANDARD
        }
    }
}
