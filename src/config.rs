use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// The SQL dialects the engine can target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DialectKind {
    /// Microsoft SQL Server (T-SQL).
    #[default]
    TSql,
    /// SQL Server Compact Edition.
    SqlServerCe,
    MySql,
    Oracle,
    Sqlite,
    /// Microsoft Access (Jet/ACE).
    Access,
}

impl DialectKind {
    pub fn all() -> [DialectKind; 6] {
        [
            DialectKind::TSql,
            DialectKind::SqlServerCe,
            DialectKind::MySql,
            DialectKind::Oracle,
            DialectKind::Sqlite,
            DialectKind::Access,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::TSql => "TSql",
            DialectKind::SqlServerCe => "SqlServerCe",
            DialectKind::MySql => "MySql",
            DialectKind::Oracle => "Oracle",
            DialectKind::Sqlite => "Sqlite",
            DialectKind::Access => "Access",
        }
    }
}

/// Provider configuration used when translating and executing queries.
///
/// - `dialect` selects the SQL language the commands are written in.
/// - `client_joins` allows one-to-many nested projections to be resolved by a
///   second batched query instead of one query per parent row.
/// - `log_sql` emits every command text through `tracing` at info level.
/// - `batch_size` is handed to the executor for batched write commands.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub dialect: DialectKind,
    pub client_joins: bool,
    pub log_sql: bool,
    pub batch_size: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::default(),
            client_joins: true,
            log_sql: false,
            batch_size: 50,
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_dialect(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn without_client_joins(mut self) -> Self {
        self.client_joins = false;
        self
    }

    pub fn with_sql_logging(mut self) -> Self {
        self.log_sql = true;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Read a configuration from JSON; absent keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ProviderConfig =
            serde_json::from_str(text).map_err(|e| QueryError::Config(e.to_string()))?;
        if config.batch_size == 0 {
            return Err(QueryError::Config("batch_size must be at least 1".into()));
        }
        Ok(config)
    }
}
