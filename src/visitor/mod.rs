pub mod rewriter;
pub use rewriter::*;

pub mod gatherers;
pub use gatherers::*;

pub mod comparer;
pub use comparer::*;

pub mod replacer;
pub use replacer::*;

pub mod duplicator;
pub use duplicator::*;

pub mod plan_writer;
pub use plan_writer::*;
