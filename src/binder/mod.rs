pub mod column_projector;
pub use column_projector::*;

pub mod member_binding;
pub use member_binding::*;

pub mod query_binder;
pub use query_binder::*;

pub mod relationship_binder;
pub use relationship_binder::*;

pub mod comparison_rewriter;
pub use comparison_rewriter::*;

pub mod outer_join_test;
pub use outer_join_test::*;
