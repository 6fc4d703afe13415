//! Call sites and their plan lifecycle.
//!
//! A monomorphic site caches one plan per resolved target, built lazily
//! on first call resolution. Plans are immutable `Arc`s swapped whole:
//! a reader either sees the old version or the new one, never a half
//! update. When class resolution publishes a type a site's signature
//! mentions, the site drops every cached plan and bumps its version;
//! the next call rebuilds against the new resolution state.
//!
//! A virtual site tracks every statically known target. It scalarizes
//! only while all targets agree on transport layout for every value
//! position; discovering a disagreeing target forces the site onto the
//! all-boxed fallback plan, and callers compiled against the scalarized
//! plan must deoptimize rather than keep calling through it.

use crate::builder::{ConventionBuilder, ParamType, SideView, Signature};
use crate::plan::CallSitePlan;
use beryl_layout::{LayoutRegistry, ValueTypeId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Target IDs
// =============================================================================

/// Identity of one resolved callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TargetId(pub u32);

impl TargetId {
    /// Get the raw id.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Monomorphic Call Sites
// =============================================================================

/// A call site with statically known targets.
pub struct CallSite {
    signature: Signature,
    caller: SideView,
    builder: Arc<ConventionBuilder>,
    plans: RwLock<FxHashMap<TargetId, Arc<CallSitePlan>>>,
    version: AtomicU32,
}

impl CallSite {
    /// Create a site for `signature` under the caller's resolution view.
    pub fn new(signature: Signature, caller: SideView, builder: Arc<ConventionBuilder>) -> Self {
        Self {
            signature,
            caller,
            builder,
            plans: RwLock::new(FxHashMap::default()),
            version: AtomicU32::new(0),
        }
    }

    /// The site's signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Current plan version.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// The plan for calling `target`, building it on first use.
    pub fn plan_for(&self, target: TargetId, callee: &SideView) -> Arc<CallSitePlan> {
        if let Some(plan) = self.plans.read().get(&target) {
            return Arc::clone(plan);
        }
        let version = self.version();
        let plan = Arc::new(
            self.builder
                .build_plan(&self.signature, &self.caller, callee, version),
        );
        let mut plans = self.plans.write();
        // A racing builder may have published first; keep whichever won,
        // both were built from the same inputs.
        Arc::clone(plans.entry(target).or_insert(plan))
    }

    /// Drop every cached plan; the next call rebuilds.
    pub fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.plans.write().clear();
        self.builder.stats().record_invalidation();
    }

    /// Whether the signature mentions `id` in any position.
    pub fn mentions(&self, id: ValueTypeId) -> bool {
        let in_params = self
            .signature
            .params
            .iter()
            .any(|p| p.ty == ParamType::Value(id));
        let in_ret = self
            .signature
            .ret
            .as_ref()
            .is_some_and(|r| r.ty == ParamType::Value(id));
        in_params || in_ret
    }

    /// Hook a site to registry resolution events: any newly published
    /// type the signature mentions invalidates the cached plans. The
    /// listener holds a weak reference, so dropped sites cost nothing.
    pub fn watch_resolutions(site: &Arc<CallSite>, registry: &LayoutRegistry) {
        let weak: Weak<CallSite> = Arc::downgrade(site);
        registry.add_listener(Box::new(move |id| {
            if let Some(site) = weak.upgrade() {
                if site.mentions(id) {
                    site.invalidate();
                }
            }
        }));
    }
}

// =============================================================================
// Virtual Call Sites
// =============================================================================

/// Outcome of discovering a new dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// All known targets agree; calls go through the scalarized plan.
    Scalarized,
    /// Targets disagree (or the type never flattens); calls go through
    /// the boxed fallback. `deopt_required` is set when the site was
    /// previously scalarized: code compiled against the old plan must
    /// deoptimize, not call through it.
    BoxedFallback { deopt_required: bool },
}

/// A call site dispatching over multiple possible targets.
pub struct VirtualCallSite {
    signature: Signature,
    caller: SideView,
    builder: Arc<ConventionBuilder>,
    targets: RwLock<FxHashMap<TargetId, SideView>>,
    current: RwLock<Option<Arc<CallSitePlan>>>,
    version: AtomicU32,
}

impl VirtualCallSite {
    /// Create a virtual site.
    pub fn new(signature: Signature, caller: SideView, builder: Arc<ConventionBuilder>) -> Self {
        Self {
            signature,
            caller,
            builder,
            targets: RwLock::new(FxHashMap::default()),
            current: RwLock::new(None),
            version: AtomicU32::new(0),
        }
    }

    /// The plan calls currently dispatch through, if any target linked.
    pub fn current_plan(&self) -> Option<Arc<CallSitePlan>> {
        self.current.read().clone()
    }

    /// Link a newly discovered target and recompute agreement.
    pub fn add_target(&self, target: TargetId, callee: SideView) -> DispatchDecision {
        let mut targets = self.targets.write();
        targets.insert(target, callee);

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let mut plans = targets
            .values()
            .map(|view| {
                self.builder
                    .build_plan(&self.signature, &self.caller, view, version)
            });

        let first = plans.next().expect("at least one target");
        let all_agree = first.any_scalarized()
            && first.adapter.is_none()
            && plans.all(|p| p.layout_agrees(&first) && p.adapter.is_none());

        let (plan, decision) = if all_agree {
            (first, DispatchDecision::Scalarized)
        } else {
            let was_scalarized = self
                .current
                .read()
                .as_ref()
                .is_some_and(|p| p.any_scalarized());
            (
                self.builder.build_boxed_plan(&self.signature, version),
                DispatchDecision::BoxedFallback {
                    deopt_required: was_scalarized,
                },
            )
        };

        *self.current.write() = Some(Arc::new(plan));
        decision
    }
}

// =============================================================================
// Tests
// =============================================================================
