use crate::config::DialectKind;
use crate::dialect::{ConcatStyle, FormatterConfig, FunctionNames, Language, LimitStyle, Pass, SQL_SERVER_TYPES, TypeSystem};
use crate::error::Result;
use crate::expr::{Expr, ExprRef};

/// Microsoft SQL Server.
#[derive(Debug, Default, Clone, Copy)]
pub struct TSqlLanguage;

pub(crate) const SQL_SERVER_FUNCTIONS: FunctionNames = FunctionNames {
    upper: "UPPER",
    lower: "LOWER",
    trim: "TRIM",
    length: "LEN",
    substring: "SUBSTRING",
    floor: "FLOOR",
    ceiling: "CEILING",
};

impl Language for TSqlLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::TSql
    }

    fn type_system(&self) -> &TypeSystem {
        &SQL_SERVER_TYPES
    }

    fn generated_id_expression(&self) -> Result<ExprRef> {
        Ok(Expr::bare_function("SCOPE_IDENTITY()"))
    }

    fn rows_affected_expression(&self) -> Option<ExprRef> {
        Some(Expr::bare_function("@@ROWCOUNT"))
    }

    fn allows_multiple_commands(&self) -> bool {
        true
    }

    fn allows_subquery_in_select_without_from(&self) -> bool {
        true
    }

    fn allows_distinct_in_aggregates(&self) -> bool {
        true
    }

    fn supports_apply(&self) -> bool {
        true
    }

    fn passes(&self) -> &'static [Pass] {
        &[Pass::OrderBy, Pass::Base, Pass::SkipToRowNumber, Pass::OrderBy]
    }

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            limit: LimitStyle::Top,
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
    fn rows_affected_reads_rowcount() {
        match TSqlLanguage.rows_affected_expression().as_deref() {
            Some(Expr::Function(f)) => assert_eq!(f.name, "@@ROWCOUNT"),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn brackets_are_not_doubled() {
        assert_eq!(TSqlLanguage.quote("[Order Details]"), "[Order Details]");
        assert_eq!(TSqlLanguage.quote("Order Details"), "[Order Details]");
    }
}
