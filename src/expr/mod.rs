pub mod table_alias;
pub use table_alias::*;

pub mod literal;
pub use literal::*;

pub mod sql_type;
pub use sql_type::*;

pub mod value_kind;
pub use value_kind::*;

pub mod node;
pub use node::*;

pub mod select;
pub use select::*;

pub mod command;
pub use command::*;

pub mod type_inference;
pub use type_inference::*;
