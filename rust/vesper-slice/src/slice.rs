//! Slice descriptors and per-component operand coercion.
//!
//! Coercion follows the slicing rules of the surface language: omitted
//! components fall back to slot defaults, out-of-range magnitudes clamp to a
//! slot-specific value instead of raising, and zero or negative steps are
//! legal here (step validation belongs to the consumer).

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::ExecutionContext;
use crate::errors::VmError;
use crate::values::{IndexProtocol, Operand};

/// One bound of a slice: an explicit machine index, or no bound at all.
///
/// `Unbounded` arises both from an omitted component and from a magnitude
/// too large for the index width. Consumers resolve it against the sequence
/// length and the sign of the step; it is never a literal index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    Unbounded,
    Fixed(i32),
}

impl Bound {
    pub fn is_unbounded(self) -> bool {
        matches!(self, Bound::Unbounded)
    }

    /// The fixed index, or `fallback` when unbounded.
    pub fn fixed_or(self, fallback: i32) -> i32 {
        match self {
            Bound::Fixed(n) => n,
            Bound::Unbounded => fallback,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Unbounded => write!(f, "null"),
            Bound::Fixed(n) => write!(f, "{}", n),
        }
    }
}

/// Canonical result of coercing the three slice operands.
///
/// Packaged exactly once and never mutated. Resolving the bounds against an
/// actual sequence length is the consumer's job; no clamping happens here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceDescriptor {
    pub start: Bound,
    pub stop: Bound,
    pub step: i32,
}

impl SliceDescriptor {
    /// Package three coerced components. Pure and total.
    pub fn new(start: Bound, stop: Bound, step: i32) -> Self {
        Self { start, stop, step }
    }
}

impl fmt::Display for SliceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slice({}, {}, {})", self.start, self.stop, self.step)
    }
}

/// Which slot of the slice expression a value is being coerced for.
///
/// The role decides what an omitted operand means and what an out-of-range
/// magnitude clamps to: start and stop use the unbounded sentinel for both,
/// step defaults to 1 and saturates to `i32::MAX` on overflow. The step
/// saturation value is the same for large-positive and large-negative
/// operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    Start,
    Stop,
    Step,
}

impl SlotRole {
    pub fn name(self) -> &'static str {
        match self {
            SlotRole::Start => "start",
            SlotRole::Stop => "stop",
            SlotRole::Step => "step",
        }
    }

    /// Value used when the operand is omitted.
    pub fn absent_bound(self) -> Bound {
        match self {
            SlotRole::Start | SlotRole::Stop => Bound::Unbounded,
            SlotRole::Step => Bound::Fixed(1),
        }
    }

    /// Value absorbed when an operand's magnitude exceeds the index width.
    pub fn overflow_bound(self) -> Bound {
        match self {
            SlotRole::Start | SlotRole::Stop => Bound::Unbounded,
            SlotRole::Step => Bound::Fixed(i32::MAX),
        }
    }
}

/// Outcome of coercing one component, with the overflow branch made visible
/// so call sites can profile it.
pub(crate) struct CoercedComponent {
    pub(crate) bound: Bound,
    /// An out-of-range magnitude was absorbed into the slot's overflow value.
    pub(crate) overflowed: bool,
}

impl CoercedComponent {
    fn exact(bound: Bound) -> Self {
        Self {
            bound,
            overflowed: false,
        }
    }

    fn clamped(role: SlotRole) -> Self {
        Self {
            bound: role.overflow_bound(),
            overflowed: true,
        }
    }
}

/// Coerce one raw slice operand into a bound for the given slot.
///
/// Overflow never surfaces as an error: it is absorbed into the slot's
/// overflow value. A type error terminates coercion of the whole triple,
/// and user-level failures raised through [`IndexProtocol::as_index`]
/// propagate verbatim.
pub fn coerce_component(
    value: &Operand,
    role: SlotRole,
    ctx: &mut ExecutionContext,
) -> Result<Bound, VmError> {
    coerce_component_inner(value, role, ctx).map(|c| c.bound)
}

pub(crate) fn coerce_component_inner(
    value: &Operand,
    role: SlotRole,
    ctx: &mut ExecutionContext,
) -> Result<CoercedComponent, VmError> {
    match value {
        Operand::Null => Ok(CoercedComponent::exact(role.absent_bound())),
        Operand::Bool(b) => Ok(CoercedComponent::exact(Bound::Fixed(i32::from(*b)))),
        Operand::Int(n) => Ok(narrow_machine(*n, role)),
        Operand::BigInt(n) => Ok(narrow_big(n, role)),
        Operand::Object(obj) => object_index(obj.as_ref(), role, ctx),
    }
}

pub(crate) fn narrow_machine(n: i64, role: SlotRole) -> CoercedComponent {
    match i32::try_from(n) {
        Ok(v) => CoercedComponent::exact(Bound::Fixed(v)),
        Err(_) => CoercedComponent::clamped(role),
    }
}

pub(crate) fn narrow_big(n: &BigInt, role: SlotRole) -> CoercedComponent {
    match n.to_i32() {
        Some(v) => CoercedComponent::exact(Bound::Fixed(v)),
        None => CoercedComponent::clamped(role),
    }
}

pub(crate) fn object_index(
    obj: &dyn IndexProtocol,
    role: SlotRole,
    ctx: &mut ExecutionContext,
) -> Result<CoercedComponent, VmError> {
    if !obj.supports_index() {
        return Err(VmError::TypeError(format!(
            "slice {} must be an integer, null, or support index conversion",
            role.name()
        )));
    }
    match obj.as_index(ctx) {
        Ok(v) => Ok(CoercedComponent::exact(Bound::Fixed(v))),
        Err(VmError::ArithmeticOverflow) => Ok(CoercedComponent::clamped(role)),
        Err(e) => Err(e),
    }
}
