//! Process-wide descriptor registry.
//!
//! Descriptors are planned once per type and published append-only; after
//! publication they are read lock-free and never mutated. Planning is
//! serialized by a registry-wide lock, mirroring how class-initialization
//! locking serializes resolution upstream of this engine.
//!
//! A type whose planning fails is permanently poisoned: the first
//! resolution surfaces the original failure, and every later access
//! reports an initialization error rather than proceeding with a zeroed
//! layout.
//!
//! Resolution listeners let the calling-convention layer re-validate
//! optimistic call-site plans when a previously unresolved type becomes
//! resolved.

use crate::decl::TypeDecl;
use crate::descriptor::{ValueTypeDescriptor, ValueTypeId};
use crate::null_marker::DescriptorSource;
use crate::planner::TypeLayoutPlanner;
use crate::stats::LayoutStats;
use beryl_core::{BerylError, BerylResult, EngineConfig};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::OnceLock;

/// Callback invoked with the id of each newly published descriptor.
pub type ResolutionListener = Box<dyn Fn(ValueTypeId) + Send + Sync>;

/// Published state of one type.
enum Entry {
    /// Planning succeeded; the descriptor is final.
    Ready(Arc<ValueTypeDescriptor>),
    /// Planning failed; the type is permanently poisoned.
    Poisoned(BerylError),
}

/// Append-only registry of planned layouts.
pub struct LayoutRegistry {
    config: EngineConfig,
    /// Declarations awaiting or under resolution.
    decls: Mutex<FxHashMap<ValueTypeId, TypeDecl>>,
    /// Published descriptors and poisoned types. Read lock-free.
    entries: DashMap<ValueTypeId, Entry>,
    /// Serializes planning, like class-initialization locking.
    planning: Mutex<()>,
    /// Resolution listeners.
    listeners: Mutex<Vec<ResolutionListener>>,
    stats: LayoutStats,
}

impl LayoutRegistry {
    /// Create a registry with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            decls: Mutex::new(FxHashMap::default()),
            entries: DashMap::new(),
            planning: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            stats: LayoutStats::new(),
        }
    }

    /// The registry's configuration.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Planning statistics.
    #[inline]
    pub fn stats(&self) -> &LayoutStats {
        &self.stats
    }

    /// Register a declaration for later resolution.
    ///
    /// Re-declaring an already published or poisoned type is rejected:
    /// the registry is append-only.
    pub fn declare(&self, id: ValueTypeId, decl: TypeDecl) -> BerylResult<()> {
        if self.entries.contains_key(&id) {
            return Err(BerylError::invalid(format!(
                "type {} is already resolved",
                id
            )));
        }
        self.decls.lock().insert(id, decl);
        Ok(())
    }

    /// Resolve `id`, planning it (and any nested types) if needed.
    pub fn resolve(&self, id: ValueTypeId) -> BerylResult<Arc<ValueTypeDescriptor>> {
        // Fast path: already published.
        if let Some(entry) = self.entries.get(&id) {
            return match &*entry {
                Entry::Ready(desc) => Ok(Arc::clone(desc)),
                Entry::Poisoned(err) => Err(Self::poisoned_error(id, err)),
            };
        }

        let _planning = self.planning.lock();
        // Re-check: another thread may have planned while we waited.
        if let Some(entry) = self.entries.get(&id) {
            return match &*entry {
                Entry::Ready(desc) => Ok(Arc::clone(desc)),
                Entry::Poisoned(err) => Err(Self::poisoned_error(id, err)),
            };
        }

        let decls = self.decls.lock();
        let mut planner = TypeLayoutPlanner::new(&self.config, &decls, &self.stats);
        match planner.plan(id) {
            Ok(desc) => {
                let planned = planner.take_planned();
                drop(decls);
                let mut published = Vec::new();
                for (planned_id, planned_desc) in planned {
                    // Nested types planned along the way publish too.
                    self.entries
                        .entry(planned_id)
                        .or_insert_with(|| {
                            published.push(planned_id);
                            Entry::Ready(planned_desc)
                        });
                }
                for planned_id in published {
                    self.notify(planned_id);
                }
                Ok(desc)
            }
            Err(err) => {
                drop(decls);
                self.entries.insert(id, Entry::Poisoned(err.clone()));
                Err(err)
            }
        }
    }

    /// Look up a published descriptor.
    ///
    /// Unresolved types report an initialization error; the convention
    /// layer uses [`try_descriptor`](Self::try_descriptor) for its
    /// optimistic checks instead.
    pub fn descriptor(&self, id: ValueTypeId) -> BerylResult<Arc<ValueTypeDescriptor>> {
        match self.entries.get(&id).as_deref() {
            Some(Entry::Ready(desc)) => Ok(Arc::clone(desc)),
            Some(Entry::Poisoned(err)) => Err(Self::poisoned_error(id, err)),
            None => Err(BerylError::invalid(format!(
                "type {} has not been resolved",
                id
            ))),
        }
    }

    /// Look up a published descriptor without error reporting.
    pub fn try_descriptor(&self, id: ValueTypeId) -> Option<Arc<ValueTypeDescriptor>> {
        match self.entries.get(&id).as_deref() {
            Some(Entry::Ready(desc)) => Some(Arc::clone(desc)),
            _ => None,
        }
    }

    /// Whether `id` has a published descriptor.
    pub fn is_resolved(&self, id: ValueTypeId) -> bool {
        matches!(self.entries.get(&id).as_deref(), Some(Entry::Ready(_)))
    }

    /// Register a resolution listener.
    pub fn add_listener(&self, listener: ResolutionListener) {
        self.listeners.lock().push(listener);
    }

    fn notify(&self, id: ValueTypeId) {
        for listener in self.listeners.lock().iter() {
            listener(id);
        }
    }

    fn poisoned_error(id: ValueTypeId, original: &BerylError) -> BerylError {
        BerylError::uninitialized(format!(
            "type {} failed to initialize: {}",
            id, original
        ))
    }
}

impl DescriptorSource for LayoutRegistry {
    fn descriptor_of(&self, id: ValueTypeId) -> BerylResult<Arc<ValueTypeDescriptor>> {
        self.descriptor(id)
    }
}

// =============================================================================
// Global Registry Access
// =============================================================================

/// Global layout registry instance.
static LAYOUT_REGISTRY: OnceLock<LayoutRegistry> = OnceLock::new();

/// Get the global layout registry (default configuration).
#[inline]
pub fn global_registry() -> &'static LayoutRegistry {
    LAYOUT_REGISTRY.get_or_init(|| LayoutRegistry::new(EngineConfig::default()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::FieldDecl;
    use beryl_core::ErrorKind;
    use beryl_core::intern::intern;
    use beryl_core::LeafKind;

    fn point_decl() -> TypeDecl {
        TypeDecl::new(
            intern("Point"),
            vec![
                FieldDecl::leaf(intern("x"), LeafKind::I32),
                FieldDecl::leaf(intern("y"), LeafKind::I32),
            ],
        )
    }

    #[test]
    fn test_resolve_publishes_once() {
        let registry = LayoutRegistry::new(EngineConfig::default());
        registry.declare(ValueTypeId(1), point_decl()).unwrap();

        let a = registry.resolve(ValueTypeId(1)).unwrap();
        let b = registry.resolve(ValueTypeId(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stats().snapshot().planned, 1);
    }

    #[test]
    fn test_nested_resolution_publishes_dependencies() {
        let registry = LayoutRegistry::new(EngineConfig::default());
        registry.declare(ValueTypeId(1), point_decl()).unwrap();
        registry
            .declare(
                ValueTypeId(2),
                TypeDecl::new(
                    intern("Line"),
                    vec![
                        FieldDecl::value(intern("a"), ValueTypeId(1)),
                        FieldDecl::value(intern("b"), ValueTypeId(1)),
                    ],
                ),
            )
            .unwrap();

        registry.resolve(ValueTypeId(2)).unwrap();
        // Point was published as a side effect.
        assert!(registry.is_resolved(ValueTypeId(1)));
    }

    #[test]
    fn test_cycle_poisons_type() {
        let registry = LayoutRegistry::new(EngineConfig::default());
        registry
            .declare(
                ValueTypeId(1),
                TypeDecl::new(
                    intern("Cyclic"),
                    vec![FieldDecl::value(intern("next"), ValueTypeId(1))],
                ),
            )
            .unwrap();

        // First resolution surfaces the cycle itself.
        let first = registry.resolve(ValueTypeId(1)).unwrap_err();
        assert_eq!(first.kind(), ErrorKind::LayoutCycle);

        // Every later access reports failed initialization.
        let second = registry.resolve(ValueTypeId(1)).unwrap_err();
        assert_eq!(second.kind(), ErrorKind::UninitializedDependency);
        let third = registry.descriptor(ValueTypeId(1)).unwrap_err();
        assert_eq!(third.kind(), ErrorKind::UninitializedDependency);
    }

    #[test]
    fn test_redeclare_after_publish_rejected() {
        let registry = LayoutRegistry::new(EngineConfig::default());
        registry.declare(ValueTypeId(1), point_decl()).unwrap();
        registry.resolve(ValueTypeId(1)).unwrap();

        let err = registry.declare(ValueTypeId(1), point_decl()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_listener_fires_on_publication() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = Arc::new(LayoutRegistry::new(EngineConfig::default()));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        registry.add_listener(Box::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        registry.declare(ValueTypeId(1), point_decl()).unwrap();
        registry.resolve(ValueTypeId(1)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Second resolve does not re-notify.
        registry.resolve(ValueTypeId(1)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_resolution_single_descriptor() {
        use std::thread;

        let registry = Arc::new(LayoutRegistry::new(EngineConfig::default()));
        registry.declare(ValueTypeId(1), point_decl()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.resolve(ValueTypeId(1)).unwrap())
            })
            .collect();

        let descs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pair in descs.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(registry.stats().snapshot().planned, 1);
    }

    #[test]
    fn test_unresolved_descriptor_lookup() {
        let registry = LayoutRegistry::new(EngineConfig::default());
        assert!(registry.try_descriptor(ValueTypeId(9)).is_none());
        let err = registry.descriptor(ValueTypeId(9)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }
}
