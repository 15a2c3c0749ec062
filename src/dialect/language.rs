use std::fmt;

use once_cell::sync::Lazy;

use crate::config::DialectKind;
use crate::dialect::{
    AccessLanguage, FormatterConfig, MySqlLanguage, OracleLanguage, SqlServerCeLanguage, SqliteLanguage, TSqlLanguage,
    TypeSystem,
};
use crate::error::Result;
use crate::expr::ExprRef;

/// One step of a dialect's rewrite sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Move orderings to the outermost select that can carry them.
    OrderBy,
    /// Shared cleanup plus apply and cross join decorrelation.
    Base,
    /// Paging through `ROW_NUMBER() OVER (..)`.
    SkipToRowNumber,
    /// Paging through nested TOP queries with inverted orderings.
    SkipToNestedOrderBy,
    /// Split cross joins out of mixed join chains.
    CrossJoinIsolate,
    UnusedColumns,
    RedundantSubqueries,
}

/// Everything that differs between SQL dialects.
pub trait Language: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn type_system(&self) -> &TypeSystem;

    /// Quote an identifier. Quoting an already quoted name returns it as is.
    fn quote(&self, name: &str) -> String {
        if name.starts_with('[') && name.ends_with(']') {
            name.to_string()
        } else {
            format!("[{name}]")
        }
    }

    /// Expression reading back the identity generated by the last insert.
    fn generated_id_expression(&self) -> Result<ExprRef>;

    /// Expression reading the number of rows touched by the last command.
    fn rows_affected_expression(&self) -> Option<ExprRef> {
        None
    }

    fn allows_multiple_commands(&self) -> bool {
        false
    }

    fn allows_subquery_in_select_without_from(&self) -> bool {
        false
    }

    fn allows_distinct_in_aggregates(&self) -> bool {
        false
    }

    /// `CROSS APPLY` / `OUTER APPLY` can be written.
    fn supports_apply(&self) -> bool {
        false
    }

    /// Rewrite sequence run after the police; always starts and ends with
    /// an ordering pass.
    fn passes(&self) -> &'static [Pass] {
        &[Pass::OrderBy, Pass::Base, Pass::OrderBy]
    }

    fn formatter_config(&self) -> FormatterConfig;
}

static LANGUAGES: Lazy<[Box<dyn Language>; 6]> = Lazy::new(|| {
    [
        Box::new(TSqlLanguage),
        Box::new(SqlServerCeLanguage),
        Box::new(MySqlLanguage),
        Box::new(OracleLanguage),
        Box::new(SqliteLanguage),
        Box::new(AccessLanguage),
    ]
});

/// Process-wide language instance for a dialect, created on first use and
/// never replaced.
pub fn default_language(kind: DialectKind) -> &'static dyn Language {
    let index = match kind {
        DialectKind::TSql => 0,
        DialectKind::SqlServerCe => 1,
        DialectKind::MySql => 2,
        DialectKind::Oracle => 3,
        DialectKind::Sqlite => 4,
        DialectKind::Access => 5,
    };
    LANGUAGES[index].as_ref()
}
