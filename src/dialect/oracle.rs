use crate::config::DialectKind;
use crate::dialect::{ConcatStyle, FormatterConfig, Language, LimitStyle, ORACLE_TYPES, Pass, TypeSystem};
use crate::error::{QueryError, Result};
use crate::expr::ExprRef;

/// Oracle. Identifiers are written as mapped; generated identities come
/// from sequences and cannot be read back here.
#[derive(Debug, Default, Clone, Copy)]
pub struct OracleLanguage;

impl Language for OracleLanguage {
    fn kind(&self) -> DialectKind {
        DialectKind::Oracle
    }

    fn type_system(&self) -> &TypeSystem {
        &ORACLE_TYPES
    }

    fn quote(&self, name: &str) -> String {
        name.to_string()
    }

    fn generated_id_expression(&self) -> Result<ExprRef> {
        Err(QueryError::unsupported_in("generated identity", self.name()))
    }

    fn allows_subquery_in_select_without_from(&self) -> bool {
        true
    }

    fn allows_distinct_in_aggregates(&self) -> bool {
        true
    }

    fn passes(&self) -> &'static [Pass] {
        &[Pass::OrderBy, Pass::Base, Pass::SkipToRowNumber, Pass::OrderBy]
    }

    fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            parameter_prefix: ":",
            limit: LimitStyle::FetchFirst,
            concat: ConcatStyle::Pipes,
            table_alias_as: false,
            dummy_from: Some("FROM DUAL"),
            ..FormatterConfig::STANDARD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_through_row_numbers() {
        assert!(OracleLanguage.passes().contains(&Pass::SkipToRowNumber));
        assert_eq!(OracleLanguage.quote("ORDERS"), "ORDERS");
    }
}
