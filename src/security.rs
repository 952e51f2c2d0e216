//! Security module: structural validation, literal-aware escaping and
//! user-scoped parameter binding for model-generated SQL.

mod binder;
mod literals;
mod validation;

pub use binder::{BinderInvariantViolation, ParameterBinder, ParameterizedQuery};
pub use literals::{code_view, escape, EscapedQuery, LiteralSpan, MalformedLiteral};
pub use validation::{
    QueryValidator, RejectionReason, SecurityVerdict, SyntaxReport, ValidationMode,
};
