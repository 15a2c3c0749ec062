pub mod row;
pub use row::*;

pub mod helpers;
pub use helpers::*;

pub mod eval;
pub use eval::*;

pub mod aggregator;
pub use aggregator::*;

pub mod projector;
pub use projector::*;

pub mod plan;
pub use plan::*;

pub mod executor;
pub use executor::*;

pub mod row_sequence;
pub use row_sequence::{AsyncRowSequence, RowSequence, SequenceState};

pub mod connection_scope;
pub use connection_scope::*;

pub mod deferred;
pub use deferred::*;

pub mod topological_sort;
pub use topological_sort::*;

pub mod builder;
pub use builder::*;

pub mod runner;
pub use runner::*;
