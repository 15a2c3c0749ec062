use crate::config::DialectKind;
use crate::dialect::{ACCESS_TYPES, ConcatStyle, FormatterConfig, FunctionNames, Language, LimitStyle, Pass, TypeSystem};
use crate::error::Result;
use crate::expr::{Expr, ExprRef};

/// Microsoft Access (Jet/ACE). No row numbers, no apply, one statement
/// per command.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLanguage;

impl Language for AccessLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::Access
    }

    fn type_system(&self) -> &TypeSystem {
        &ACCESS_TYPES
    }

    fn generated_id_expression(&self) -> Result<ExprRef> {
        Ok(Expr::bare_function("@@IDENTITY"))
    }

    fn passes(&self) -> &'static [Pass] {
        &[
            Pass::OrderBy,
            Pass::Base,
            Pass::CrossJoinIsolate,
            Pass::SkipToNestedOrderBy,
            Pass::OrderBy,
            Pass::UnusedColumns,
            Pass::RedundantSubqueries,
            Pass::OrderBy,
        ]
    }

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            limit: LimitStyle::Top,
            concat: ConcatStyle::Ampersand,
            functions: FunctionNames {
                upper: "UCASE",
                lower: "LCASE",
                trim: "TRIM",
                length: "LEN",
                substring: "MID",
                floor: "INT",
                ceiling: "",
            },
            parenthesize_joins: true,
            comma_cross_join: true,
            iif: true,
            mod_keyword: true,
            date_delimiter: '#',
            true_value: "TRUE",
            false_value: "FALSE",
            ..FormatterConfig::STANDARD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_pages_with_nested_top() {
        let passes = AccessLanguage.passes();
        assert!(passes.contains(&Pass::SkipToNestedOrderBy));
        assert!(!passes.contains(&Pass::SkipToRowNumber));
        assert!(passes.contains(&Pass::RedundantSubqueries));
    }
}
