pub mod include_path;
pub use include_path::*;

pub mod query_policy;
pub use query_policy::*;

pub mod relationship_includer;
pub use relationship_includer::*;

pub mod query_police;
pub use query_police::*;
