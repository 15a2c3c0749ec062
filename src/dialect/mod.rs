pub mod type_system;
pub use type_system::*;

pub mod language;
pub use language::*;

pub mod formatter;
pub use formatter::*;

pub mod linguist;
pub use linguist::*;

pub mod tsql;
pub use tsql::*;

pub mod sql_server_ce;
pub use sql_server_ce::*;

pub mod mysql;
pub use mysql::*;

pub mod oracle;
pub use oracle::*;

pub mod sqlite;
pub use sqlite::*;

pub mod access;
pub use access::*;
