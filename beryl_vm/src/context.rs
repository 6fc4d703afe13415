//! Shared engine state every tier executes against.

use crate::safepoint::Safepoint;
use beryl_core::EngineConfig;
use beryl_layout::LayoutRegistry;
use beryl_runtime::{AccessStats, BufferingCoordinator, HandleTable};
use std::sync::Arc;

/// The per-process engine: one registry, one handle table, one
/// coordinator, one access-stats surface. Tiers are views over this
/// context, never owners of divergent copies; that sharing is what
/// makes cross-tier agreement structural.
pub struct EngineContext {
    registry: Arc<LayoutRegistry>,
    handles: Arc<HandleTable>,
    coordinator: BufferingCoordinator,
    access: AccessStats,
    safepoint: Safepoint,
}

impl EngineContext {
    /// Create a context with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(LayoutRegistry::new(config)))
    }

    /// Create a context over an existing registry.
    pub fn with_registry(registry: Arc<LayoutRegistry>) -> Self {
        let handles = Arc::new(HandleTable::new());
        Self {
            registry,
            coordinator: BufferingCoordinator::new(Arc::clone(&handles)),
            safepoint: Safepoint::new(Arc::clone(&handles)),
            handles,
            access: AccessStats::new(),
        }
    }

    /// The shared layout registry.
    #[inline]
    pub fn registry(&self) -> &Arc<LayoutRegistry> {
        &self.registry
    }

    /// The shared handle table.
    #[inline]
    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    /// The buffering coordinator.
    #[inline]
    pub fn coordinator(&self) -> &BufferingCoordinator {
        &self.coordinator
    }

    /// Flat-access statistics.
    #[inline]
    pub fn access_stats(&self) -> &AccessStats {
        &self.access
    }

    /// The safepoint coordinator.
    #[inline]
    pub fn safepoint(&self) -> &Safepoint {
        &self.safepoint
    }
}

// =============================================================================
// Tests
// =============================================================================
