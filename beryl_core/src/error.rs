//! Engine-wide error type.
//!
//! Two propagation regimes apply. Layout- and initialization-level errors
//! permanently poison the affected type: every later access to it reports
//! the same failure. Per-operation errors (null restriction, array store
//! mismatch) are scoped to the single operation and leave other instances
//! and call sites untouched.

/// Classification of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A value type flat-contains itself, directly or transitively.
    /// Detected at resolution time, before any instance exists.
    LayoutCycle,
    /// The type's initialization failed earlier; all subsequent accesses
    /// surface this, never a zeroed instance.
    UninitializedDependency,
    /// Null written into a null-restricted flat field or array slot.
    NullRestriction,
    /// Element store with a descriptor the array does not accept.
    ArrayStore,
    /// Value passed where an incompatible type was required.
    ClassCast,
    /// Identity-based clone attempted on an inline type.
    CloneUnsupported,
    /// Named field does not exist on the descriptor.
    FieldMissing,
    /// Access to a private buffer outside its window.
    IllegalAccess,
    /// A consistency check observed a torn access. Never expected to be
    /// observable; indicates an enforcer bug, not a program error.
    AtomicityViolation,
    /// Operation not valid for the value's current state.
    InvalidOperation,
}

impl ErrorKind {
    /// Whether this kind permanently poisons the type it occurred on.
    #[inline]
    pub const fn poisons_type(self) -> bool {
        matches!(self, ErrorKind::LayoutCycle | ErrorKind::UninitializedDependency)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::LayoutCycle => "layout cycle",
            ErrorKind::UninitializedDependency => "uninitialized dependency",
            ErrorKind::NullRestriction => "null restriction violation",
            ErrorKind::ArrayStore => "array store mismatch",
            ErrorKind::ClassCast => "class cast",
            ErrorKind::CloneUnsupported => "clone unsupported",
            ErrorKind::FieldMissing => "field missing",
            ErrorKind::IllegalAccess => "illegal access",
            ErrorKind::AtomicityViolation => "atomicity violation",
            ErrorKind::InvalidOperation => "invalid operation",
        };
        write!(f, "{}", name)
    }
}

/// An engine error: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BerylError {
    kind: ErrorKind,
    message: String,
}

impl BerylError {
    /// Create an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Layout cycle detected during type resolution.
    pub fn layout_cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LayoutCycle, message)
    }

    /// Access to a type whose initialization previously failed.
    pub fn uninitialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UninitializedDependency, message)
    }

    /// Null written into a null-restricted slot.
    pub fn null_restriction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NullRestriction, message)
    }

    /// Incompatible element store.
    pub fn array_store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArrayStore, message)
    }

    /// Incompatible value where another type was required.
    pub fn class_cast(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ClassCast, message)
    }

    /// Identity clone attempted on an inline type.
    pub fn clone_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CloneUnsupported, message)
    }

    /// Unknown field name or index.
    pub fn field_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FieldMissing, message)
    }

    /// Private-buffer access outside its window.
    pub fn illegal_access(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalAccess, message)
    }

    /// Operation not valid in the current state.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    /// The error's kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error's message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for BerylError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BerylError {}

/// Result alias used throughout the engine.
pub type BerylResult<T> = Result<T, BerylError>;

// =============================================================================
// Tests
// =============================================================================
