pub mod error;
pub use error::{QueryError, Result};

pub mod config;
pub use config::{DialectKind, ProviderConfig};

pub mod expr;

pub mod query;
pub use query::{QExpr, Query};

pub mod visitor;

pub mod mapping;
pub use mapping::{EntityMapping, MappedEntity, QueryMapping, WriteKind};

pub mod binder;

pub mod rewrite;

pub mod policy;
pub use policy::QueryPolicy;

pub mod dialect;
pub use dialect::Language;

pub mod execution;
pub use execution::{AsyncQueryExecutor, AsyncRowReader, Connection, QueryExecutor, RowReader};

pub mod provider;
pub use provider::{ChangeSet, CompiledQuery, QueryProvider};
