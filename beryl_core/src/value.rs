//! Leaf scalar values and object handles.
//!
//! A flattened value is ultimately a sequence of leaf scalars written at
//! fixed offsets into a payload. `Scalar` is the runtime representation of
//! one leaf; `LeafKind` is its static type. Reference leaves hold an
//! `ObjId` handle rather than an address: objects may be relocated, and a
//! handle remains valid where a raw address would not.

// =============================================================================
// Object Handles
// =============================================================================

/// Handle to a heap-resident boxed instance.
///
/// Identity comparisons on boxed values compare handles. The raw value is
/// an index into the process handle table; `0` is reserved and never
/// issued, so a payload word of `0` always decodes as a null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjId(pub u64);

impl ObjId {
    /// Get the raw handle value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Leaf Kinds
// =============================================================================

/// Static type of a leaf field after full flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LeafKind {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    /// Reference leaf: a handle word, nullable.
    Ref = 6,
}

impl LeafKind {
    /// Payload size of this leaf in bytes.
    #[inline]
    pub const fn size_bytes(self) -> u32 {
        match self {
            LeafKind::I8 => 1,
            LeafKind::I16 => 2,
            LeafKind::I32 | LeafKind::F32 => 4,
            LeafKind::I64 | LeafKind::F64 | LeafKind::Ref => 8,
        }
    }

    /// Natural alignment of this leaf (equal to its size).
    #[inline]
    pub const fn alignment(self) -> u32 {
        self.size_bytes()
    }

    /// Whether this leaf holds an object reference the GC must see.
    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, LeafKind::Ref)
    }
}

impl std::fmt::Display for LeafKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LeafKind::I8 => "i8",
            LeafKind::I16 => "i16",
            LeafKind::I32 => "i32",
            LeafKind::I64 => "i64",
            LeafKind::F32 => "f32",
            LeafKind::F64 => "f64",
            LeafKind::Ref => "ref",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Scalars
// =============================================================================

/// Runtime value of a single leaf field.
///
/// References are `Option<ObjId>`; `None` is the null reference. Floats
/// compare by bit pattern under substitutability rules (`NaN == NaN` when
/// the bits match), so equality here is derived on the raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    /// f32 stored as raw bits for bit-pattern equality.
    F32(u32),
    F64(u64),
    Ref(Option<ObjId>),
}

impl Scalar {
    /// Create a float scalar from an `f32`.
    #[inline]
    pub fn from_f32(v: f32) -> Self {
        Scalar::F32(v.to_bits())
    }

    /// Create a float scalar from an `f64`.
    #[inline]
    pub fn from_f64(v: f64) -> Self {
        Scalar::F64(v.to_bits())
    }

    /// The leaf kind of this scalar.
    #[inline]
    pub const fn kind(self) -> LeafKind {
        match self {
            Scalar::I8(_) => LeafKind::I8,
            Scalar::I16(_) => LeafKind::I16,
            Scalar::I32(_) => LeafKind::I32,
            Scalar::I64(_) => LeafKind::I64,
            Scalar::F32(_) => LeafKind::F32,
            Scalar::F64(_) => LeafKind::F64,
            Scalar::Ref(_) => LeafKind::Ref,
        }
    }

    /// The zero/default scalar for a leaf kind (null for references).
    #[inline]
    pub const fn default_for(kind: LeafKind) -> Self {
        match kind {
            LeafKind::I8 => Scalar::I8(0),
            LeafKind::I16 => Scalar::I16(0),
            LeafKind::I32 => Scalar::I32(0),
            LeafKind::I64 => Scalar::I64(0),
            LeafKind::F32 => Scalar::F32(0),
            LeafKind::F64 => Scalar::F64(0),
            LeafKind::Ref => Scalar::Ref(None),
        }
    }

    /// Widen to a raw 64-bit transport word.
    ///
    /// This is the form a scalarized leaf takes in a register or stack
    /// slot. `from_transport_word` inverts it for the leaf's kind.
    #[inline]
    pub fn to_transport_word(self) -> u64 {
        match self {
            Scalar::I8(v) => v as u8 as u64,
            Scalar::I16(v) => v as u16 as u64,
            Scalar::I32(v) => v as u32 as u64,
            Scalar::I64(v) => v as u64,
            Scalar::F32(bits) => bits as u64,
            Scalar::F64(bits) => bits,
            Scalar::Ref(None) => 0,
            Scalar::Ref(Some(id)) => id.raw(),
        }
    }

    /// Reconstruct a scalar of `kind` from a transport word.
    #[inline]
    pub fn from_transport_word(kind: LeafKind, word: u64) -> Self {
        match kind {
            LeafKind::I8 => Scalar::I8(word as u8 as i8),
            LeafKind::I16 => Scalar::I16(word as u16 as i16),
            LeafKind::I32 => Scalar::I32(word as u32 as i32),
            LeafKind::I64 => Scalar::I64(word as i64),
            LeafKind::F32 => Scalar::F32(word as u32),
            LeafKind::F64 => Scalar::F64(word),
            LeafKind::Ref => {
                if word == 0 {
                    Scalar::Ref(None)
                } else {
                    Scalar::Ref(Some(ObjId(word)))
                }
            }
        }
    }

    /// Write this scalar into `bytes` at `offset` (little-endian).
    ///
    /// # Panics
    /// Panics if the write would run past the end of `bytes`; offsets come
    /// from a planned descriptor, so an out-of-range offset is a layout bug.
    pub fn write_to(self, bytes: &mut [u8], offset: u32) {
        let off = offset as usize;
        match self {
            Scalar::I8(v) => bytes[off] = v as u8,
            Scalar::I16(v) => bytes[off..off + 2].copy_from_slice(&v.to_le_bytes()),
            Scalar::I32(v) => bytes[off..off + 4].copy_from_slice(&v.to_le_bytes()),
            Scalar::I64(v) => bytes[off..off + 8].copy_from_slice(&v.to_le_bytes()),
            Scalar::F32(bits) => bytes[off..off + 4].copy_from_slice(&bits.to_le_bytes()),
            Scalar::F64(bits) => bytes[off..off + 8].copy_from_slice(&bits.to_le_bytes()),
            Scalar::Ref(r) => {
                let word = r.map_or(0, ObjId::raw);
                bytes[off..off + 8].copy_from_slice(&word.to_le_bytes());
            }
        }
    }

    /// Read a scalar of `kind` from `bytes` at `offset`.
    pub fn read_from(bytes: &[u8], offset: u32, kind: LeafKind) -> Self {
        let off = offset as usize;
        match kind {
            LeafKind::I8 => Scalar::I8(bytes[off] as i8),
            LeafKind::I16 => {
                Scalar::I16(i16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()))
            }
            LeafKind::I32 => {
                Scalar::I32(i32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()))
            }
            LeafKind::I64 => {
                Scalar::I64(i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()))
            }
            LeafKind::F32 => {
                Scalar::F32(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()))
            }
            LeafKind::F64 => {
                Scalar::F64(u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()))
            }
            LeafKind::Ref => {
                let word = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
                Scalar::from_transport_word(LeafKind::Ref, word)
            }
        }
    }

    /// Get the reference payload if this is a reference leaf.
    #[inline]
    pub fn as_ref_id(self) -> Option<Option<ObjId>> {
        match self {
            Scalar::Ref(r) => Some(r),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
