//! Slice operand coercion for the Vesper VM — turns the raw (start, stop,
//! step) operands of a slice expression into an immutable bounded triple,
//! with per-call-site adaptive dispatch.

pub mod context;
pub mod dispatch;
pub mod errors;
pub mod slice;
pub mod values;
