pub mod query_mapping;
pub use query_mapping::*;

pub mod entity_mapping;
pub use entity_mapping::*;

pub mod mapper;
pub use mapper::*;
