pub mod change_set;
pub use change_set::*;

pub mod query_provider;
pub use query_provider::*;
