pub mod query_op;
pub use query_op::*;

pub mod builder;
pub use builder::*;
