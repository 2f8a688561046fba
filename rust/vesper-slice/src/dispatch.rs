//! Per-call-site adaptive dispatch for slice coercion.
//!
//! Every slice expression owns one [`SliceSite`]. The site remembers which
//! operand shapes it has seen, up to a configurable limit, and routes repeat
//! shapes through a kind-specialized path. A site that proves polymorphic
//! beyond the limit switches to generic dispatch once and stays there.
//!
//! ```text
//! ┌──────────────┐  literal ints   ┌──────────────┐
//! │ SliceSite     │────────────────▶│ direct build  │
//! │  coerce()     │                 └──────────────┘
//! └──────┬────────┘
//!        │ shape hit                ┌──────────────┐
//!        ├─────────────────────────▶│ shaped route  │
//!        │ miss, room               └──────────────┘
//!        ├────────▶ install shape (publish once), then route
//!        │ miss, full
//!        └────────▶ generic from now on (one-way)
//! ```
//!
//! A site may be shared by threads executing the same expression
//! concurrently. Shape slots publish once, the generic switch is a monotonic
//! flag, and coercion itself mutates no shared state, so racing threads
//! always observe either the old cache state or a fully-installed new one.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::context::ExecutionContext;
use crate::errors::VmError;
use crate::slice::{
    coerce_component_inner, narrow_big, narrow_machine, object_index, Bound, CoercedComponent,
    SliceDescriptor, SlotRole,
};
use crate::values::{Operand, OperandKind};

/// Configuration for a slice call site's dispatch cache.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Distinct operand shapes a site tolerates before it permanently
    /// switches to generic dispatch.
    pub max_shapes: usize,
    /// Whether shape caching is enabled at all. A disabled site routes
    /// everything beyond the literal paths through generic dispatch.
    pub enabled: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            max_shapes: 4,
            enabled: true,
        }
    }
}

/// The per-slot operand kinds observed in one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchShape([OperandKind; 3]);

impl DispatchShape {
    pub fn of(start: &Operand, stop: &Operand, step: &Operand) -> Self {
        Self([start.kind(), stop.kind(), step.kind()])
    }

    pub fn kinds(self) -> [OperandKind; 3] {
        self.0
    }
}

/// Point-in-time counters for one call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStats {
    /// Invocations served by the always-on literal integer paths.
    pub literal_hits: u64,
    /// Invocations served by a cached shape.
    pub shaped_hits: u64,
    /// Shapes installed over the site's lifetime.
    pub shapes_installed: u64,
    /// 1 once the site has switched to generic dispatch.
    pub generic_transitions: u64,
    /// Invocations served by full generic dispatch.
    pub generic_dispatches: u64,
    /// Out-of-range magnitudes absorbed into slot overflow values.
    pub overflow_absorbed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    literal_hits: AtomicU64,
    shaped_hits: AtomicU64,
    shapes_installed: AtomicU64,
    generic_transitions: AtomicU64,
    generic_dispatches: AtomicU64,
    overflow_absorbed: AtomicU64,
}

/// Dispatch state owned by one slice expression call site.
///
/// Embed one per slice expression node and share it freely across threads;
/// all interior mutation is publish-once or monotonic.
#[derive(Debug)]
pub struct SliceSite {
    /// Installed shape slots. Each slot publishes at most once.
    shapes: Box<[OnceCell<DispatchShape>]>,
    /// One-way switch: set when the site outgrows its shape budget.
    generic: AtomicBool,
    counters: Counters,
}

impl Default for SliceSite {
    fn default() -> Self {
        Self::new()
    }
}

impl SliceSite {
    pub fn new() -> Self {
        Self::with_config(SiteConfig::default())
    }

    pub fn with_config(config: SiteConfig) -> Self {
        let slots: Vec<OnceCell<DispatchShape>> =
            (0..config.max_shapes).map(|_| OnceCell::new()).collect();
        Self {
            shapes: slots.into_boxed_slice(),
            generic: AtomicBool::new(!config.enabled),
            counters: Counters::default(),
        }
    }

    /// Whether the site has switched to generic dispatch.
    pub fn is_generic(&self) -> bool {
        self.generic.load(Ordering::Acquire)
    }

    /// Snapshot of the site's dispatch counters.
    pub fn site_stats(&self) -> SiteStats {
        SiteStats {
            literal_hits: self.counters.literal_hits.load(Ordering::Relaxed),
            shaped_hits: self.counters.shaped_hits.load(Ordering::Relaxed),
            shapes_installed: self.counters.shapes_installed.load(Ordering::Relaxed),
            generic_transitions: self.counters.generic_transitions.load(Ordering::Relaxed),
            generic_dispatches: self.counters.generic_dispatches.load(Ordering::Relaxed),
            overflow_absorbed: self.counters.overflow_absorbed.load(Ordering::Relaxed),
        }
    }

    /// Coerce the three raw operands of this site's slice expression.
    ///
    /// Fails fast on the first component that is neither integer-like nor
    /// index-capable; no partial descriptor is ever produced.
    pub fn coerce(
        &self,
        start: &Operand,
        stop: &Operand,
        step: &Operand,
        ctx: &mut ExecutionContext,
    ) -> Result<SliceDescriptor, VmError> {
        // The two dominant slicing idioms skip the cache entirely: three
        // in-range machine integers, and two with the step omitted.
        if let (Operand::Int(a), Operand::Int(b), Operand::Int(c)) = (start, stop, step) {
            if let (Ok(a), Ok(b), Ok(c)) = (i32::try_from(*a), i32::try_from(*b), i32::try_from(*c))
            {
                self.counters.literal_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(SliceDescriptor::new(Bound::Fixed(a), Bound::Fixed(b), c));
            }
        }
        if let (Operand::Int(a), Operand::Int(b), Operand::Null) = (start, stop, step) {
            if let (Ok(a), Ok(b)) = (i32::try_from(*a), i32::try_from(*b)) {
                self.counters.literal_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(SliceDescriptor::new(Bound::Fixed(a), Bound::Fixed(b), 1));
            }
        }

        if self.is_generic() {
            return self.coerce_generic(start, stop, step, ctx);
        }

        let shape = DispatchShape::of(start, stop, step);
        if self.lookup_or_install(shape) {
            self.counters.shaped_hits.fetch_add(1, Ordering::Relaxed);
            self.coerce_shaped(shape, start, stop, step, ctx)
        } else {
            self.coerce_generic(start, stop, step, ctx)
        }
    }

    /// Find `shape` in the slot table, installing it if there is room.
    /// Returns `false` once the site has outgrown its budget.
    fn lookup_or_install(&self, shape: DispatchShape) -> bool {
        for slot in self.shapes.iter() {
            match slot.get() {
                Some(s) if *s == shape => return true,
                Some(_) => continue,
                None => {
                    if slot.set(shape).is_ok() {
                        self.counters.shapes_installed.fetch_add(1, Ordering::Relaxed);
                        return true;
                    }
                    // Lost the publish race; whatever landed decides.
                    if slot.get().is_some_and(|s| *s == shape) {
                        return true;
                    }
                }
            }
        }
        // Every slot holds some other shape: the site is polymorphic beyond
        // its budget. The switch is one-way and taken exactly once.
        if !self.generic.swap(true, Ordering::AcqRel) {
            self.counters.generic_transitions.fetch_add(1, Ordering::Relaxed);
        }
        false
    }

    fn coerce_shaped(
        &self,
        shape: DispatchShape,
        start: &Operand,
        stop: &Operand,
        step: &Operand,
        ctx: &mut ExecutionContext,
    ) -> Result<SliceDescriptor, VmError> {
        let [start_kind, stop_kind, step_kind] = shape.kinds();
        let start = self.coerce_slot(start_kind, start, SlotRole::Start, ctx)?;
        let stop = self.coerce_slot(stop_kind, stop, SlotRole::Stop, ctx)?;
        let step = self.coerce_slot(step_kind, step, SlotRole::Step, ctx)?;
        // Step policies only ever produce fixed bounds.
        Ok(SliceDescriptor::new(start, stop, step.fixed_or(1)))
    }

    /// Coerce one slot along its recorded kind, skipping the full variant
    /// scan. Null and boolean slots never touch the context.
    #[inline]
    fn coerce_slot(
        &self,
        kind: OperandKind,
        value: &Operand,
        role: SlotRole,
        ctx: &mut ExecutionContext,
    ) -> Result<Bound, VmError> {
        let coerced = match (kind, value) {
            (OperandKind::Null, Operand::Null) => return Ok(role.absent_bound()),
            (OperandKind::Bool, Operand::Bool(b)) => return Ok(Bound::Fixed(i32::from(*b))),
            (OperandKind::Int, Operand::Int(n)) => narrow_machine(*n, role),
            (OperandKind::BigInt, Operand::BigInt(n)) => narrow_big(n, role),
            (OperandKind::Object, Operand::Object(obj)) => object_index(obj.as_ref(), role, ctx)?,
            // A recorded kind never disagrees with the operand it was
            // computed from; the full path keeps this total regardless.
            _ => coerce_component_inner(value, role, ctx)?,
        };
        Ok(self.absorb(coerced))
    }

    fn coerce_generic(
        &self,
        start: &Operand,
        stop: &Operand,
        step: &Operand,
        ctx: &mut ExecutionContext,
    ) -> Result<SliceDescriptor, VmError> {
        self.counters.generic_dispatches.fetch_add(1, Ordering::Relaxed);
        let start = self.component(start, SlotRole::Start, ctx)?;
        let stop = self.component(stop, SlotRole::Stop, ctx)?;
        let step = self.component(step, SlotRole::Step, ctx)?;
        Ok(SliceDescriptor::new(start, stop, step.fixed_or(1)))
    }

    fn component(
        &self,
        value: &Operand,
        role: SlotRole,
        ctx: &mut ExecutionContext,
    ) -> Result<Bound, VmError> {
        let coerced = coerce_component_inner(value, role, ctx)?;
        Ok(self.absorb(coerced))
    }

    fn absorb(&self, coerced: CoercedComponent) -> Bound {
        if coerced.overflowed {
            self.counters.overflow_absorbed.fetch_add(1, Ordering::Relaxed);
        }
        coerced.bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn coerce_at(
        site: &SliceSite,
        start: Operand,
        stop: Operand,
        step: Operand,
    ) -> Result<SliceDescriptor, VmError> {
        let mut ctx = ExecutionContext::new();
        site.coerce(&start, &stop, &step, &mut ctx)
    }

    #[test]
    fn config_defaults() {
        let config = SiteConfig::default();
        assert_eq!(config.max_shapes, 4);
        assert!(config.enabled);
    }

    #[test]
    fn shape_records_per_slot_kinds() {
        let shape = DispatchShape::of(&Operand::Int(1), &Operand::Null, &Operand::Bool(true));
        assert_eq!(
            shape.kinds(),
            [OperandKind::Int, OperandKind::Null, OperandKind::Bool]
        );
    }

    #[test]
    fn literal_paths_bypass_the_cache() {
        let site = SliceSite::new();
        let d = coerce_at(&site, Operand::Int(1), Operand::Int(9), Operand::Int(2)).unwrap();
        assert_eq!(d, SliceDescriptor::new(Bound::Fixed(1), Bound::Fixed(9), 2));
        let d = coerce_at(&site, Operand::Int(1), Operand::Int(9), Operand::Null).unwrap();
        assert_eq!(d.step, 1);

        let stats = site.site_stats();
        assert_eq!(stats.literal_hits, 2);
        assert_eq!(stats.shapes_installed, 0);
        assert_eq!(stats.generic_dispatches, 0);
    }

    #[test]
    fn repeat_shapes_hit_the_cache() {
        let site = SliceSite::new();
        for _ in 0..3 {
            coerce_at(&site, Operand::Null, Operand::Int(9), Operand::Int(2)).unwrap();
        }
        let stats = site.site_stats();
        assert_eq!(stats.shapes_installed, 1);
        assert_eq!(stats.shaped_hits, 3);
        assert!(!site.is_generic());
    }

    #[test]
    fn outgrowing_the_budget_switches_generic_once() {
        let site = SliceSite::with_config(SiteConfig {
            max_shapes: 2,
            enabled: true,
        });
        // Three distinct non-literal shapes against a budget of two.
        coerce_at(&site, Operand::Null, Operand::Int(9), Operand::Int(2)).unwrap();
        coerce_at(&site, Operand::Bool(true), Operand::Int(9), Operand::Int(2)).unwrap();
        coerce_at(&site, Operand::Null, Operand::Null, Operand::Null).unwrap();
        assert!(site.is_generic());

        // Known shapes keep working, now through the generic path.
        let d = coerce_at(&site, Operand::Null, Operand::Int(9), Operand::Int(2)).unwrap();
        assert_eq!(d, SliceDescriptor::new(Bound::Unbounded, Bound::Fixed(9), 2));

        let stats = site.site_stats();
        assert_eq!(stats.generic_transitions, 1);
        assert_eq!(stats.shapes_installed, 2);
        assert!(stats.generic_dispatches >= 2);
        assert!(!SliceSite::new().is_generic());
    }

    #[test]
    fn disabled_sites_route_generic_immediately() {
        let site = SliceSite::with_config(SiteConfig {
            max_shapes: 4,
            enabled: false,
        });
        coerce_at(&site, Operand::Null, Operand::Int(9), Operand::Int(2)).unwrap();
        let stats = site.site_stats();
        assert_eq!(stats.shapes_installed, 0);
        assert_eq!(stats.generic_dispatches, 1);
    }

    #[test]
    fn zero_budget_is_generic_from_the_first_miss() {
        let site = SliceSite::with_config(SiteConfig {
            max_shapes: 0,
            enabled: true,
        });
        coerce_at(&site, Operand::Null, Operand::Null, Operand::Null).unwrap();
        assert!(site.is_generic());
    }

    #[test]
    fn overflow_absorption_is_profiled() {
        let site = SliceSite::new();
        // Out-of-range literal ints fall off the literal path and clamp.
        let d = coerce_at(&site, Operand::Int(i64::MAX), Operand::Int(0), Operand::Int(2)).unwrap();
        assert_eq!(d.start, Bound::Unbounded);
        coerce_at(
            &site,
            Operand::BigInt(BigInt::from(2).pow(100)),
            Operand::Null,
            Operand::Null,
        )
        .unwrap();
        assert_eq!(site.site_stats().overflow_absorbed, 2);
    }
}
