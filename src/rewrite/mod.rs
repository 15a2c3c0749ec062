pub mod aggregate_rewriter;
pub use aggregate_rewriter::*;

pub mod unused_column_remover;
pub use unused_column_remover::*;

pub mod redundant_column_remover;
pub use redundant_column_remover::*;

pub mod redundant_subquery_remover;
pub use redundant_subquery_remover::*;

pub mod redundant_join_remover;
pub use redundant_join_remover::*;

pub mod singleton_projection_rewriter;
pub use singleton_projection_rewriter::*;

pub mod client_joined_projection_rewriter;
pub use client_joined_projection_rewriter::*;

pub mod order_by_rewriter;
pub use order_by_rewriter::*;

pub mod cross_apply_rewriter;
pub use cross_apply_rewriter::*;

pub mod cross_join_rewriter;
pub use cross_join_rewriter::*;

pub mod cross_join_isolator;
pub use cross_join_isolator::*;

pub mod skip_to_row_number_rewriter;
pub use skip_to_row_number_rewriter::*;

pub mod skip_to_nested_order_by_rewriter;
pub use skip_to_nested_order_by_rewriter::*;

pub mod parameterizer;
pub use parameterizer::*;

pub mod column_binding_validator;
pub use column_binding_validator::*;
