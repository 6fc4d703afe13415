//! String interning for field and type names.
//!
//! Interned strings compare and hash by pointer, which keeps descriptor
//! lookups O(1) on the comparison itself. The table is append-only and
//! process-wide.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::OnceLock;

/// An interned, immutable string.
///
/// Equality is pointer equality: two `InternedString`s produced by
/// [`intern`] for the same text always share one allocation.
#[derive(Debug, Clone)]
pub struct InternedString(Arc<str>);

impl InternedString {
    /// View the underlying text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for InternedString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for InternedString {}

impl std::hash::Hash for InternedString {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl std::fmt::Display for InternedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Global intern table.
static INTERN_TABLE: OnceLock<Mutex<FxHashMap<Box<str>, Arc<str>>>> = OnceLock::new();

/// Intern a string, returning the canonical shared allocation.
pub fn intern(text: &str) -> InternedString {
    let table = INTERN_TABLE.get_or_init(|| Mutex::new(FxHashMap::default()));
    let mut table = table.lock();
    if let Some(existing) = table.get(text) {
        return InternedString(Arc::clone(existing));
    }
    let shared: Arc<str> = Arc::from(text);
    table.insert(Box::from(text), Arc::clone(&shared));
    InternedString(shared)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_same_text_shares_allocation() {
        let a = intern("field_x");
        let b = intern("field_x");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "field_x");
    }

    #[test]
    fn test_intern_different_text() {
        let a = intern("alpha");
        let b = intern("beta");
        assert_ne!(a, b);
    }

    #[test]
    fn test_intern_hash_consistency() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(intern("k"));
        assert!(set.contains(&intern("k")));
        assert!(!set.contains(&intern("other")));
    }
}
