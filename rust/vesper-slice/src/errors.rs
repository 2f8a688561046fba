//! Runtime errors surfaced by slice operand coercion.

use thiserror::Error;

/// Errors raised while coercing slice operands.
///
/// `ArithmeticOverflow` doubles as the overflow signal for
/// [`IndexProtocol`](crate::values::IndexProtocol) conversions: the coercer
/// absorbs it into the slot's overflow value instead of surfacing it.
/// Everything else propagates to the evaluator unchanged.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("type error at runtime: {0}")]
    TypeError(String),
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
}
