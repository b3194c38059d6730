#![forbid(unsafe_code)]

//! Invertible position hashing for tree identities.
//!
//! A [`PositionHash`] names a position in a tree that is rebuilt on every
//! update pass. The tree builder folds one segment per level into the hash
//! (a group key, or another position hash for nested identities):
//!
//! ```text
//! compound(h, seg, s)          = rotl(h, s) ^ widen(seg)
//! uncompound(h, seg, s)        = rotr(h ^ widen(seg), s)
//! bottom_up_compound(h, seg, s) = h ^ rotl(widen(seg), s)
//! ```
//!
//! # Invariants
//!
//! 1. `uncompound(compound(h, seg, s), seg, s) == h` for every `s` in `0..64`.
//! 2. Composing a path root-to-leaf with a fixed per-level shift yields the
//!    same value as composing it leaf-to-root with `bottom_up_compound`,
//!    where the segment at distance `d` from the leaf uses shift `d * s`
//!    (mod 64). This lets a candidate match be recognized while searching
//!    upward from it.
//! 3. [`PositionHash::EMPTY`] (zero) is the hash of "nothing hashed yet".
//!
//! The scheme is not cryptographic. Collisions are possible; uniqueness is
//! only very likely.
//!
//! # Example
//!
//! ```
//! use recompose_core::position_hash::{PositionHash, PositionHasher, Segment, Shift};
//!
//! let per_level = Shift::new(3).unwrap();
//! let mut hasher = PositionHasher::new(per_level);
//! hasher.push(10);
//! hasher.push(20);
//!
//! let upward = PositionHasher::bottom_up(
//!     [Segment::Key(20), Segment::Key(10)],
//!     PositionHash::EMPTY,
//!     per_level,
//! );
//! assert_eq!(hasher.current(), upward);
//! ```

use std::fmt;

use crate::error::InvalidArgument;

/// Number of bits in a [`PositionHash`].
pub const HASH_BITS: u32 = u64::BITS;

/// Per-level shift used by the tree builder unless configured otherwise.
pub const DEFAULT_LEVEL_SHIFT: Shift = Shift(3);

/// A validated rotation amount in `0..64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Shift(u32);

impl Shift {
    /// No rotation.
    pub const ZERO: Self = Self(0);

    /// Validate a shift amount.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`] when `bits >= 64`.
    pub const fn new(bits: u32) -> Result<Self, InvalidArgument> {
        if bits < HASH_BITS {
            Ok(Self(bits))
        } else {
            Err(InvalidArgument::new(
                "shift",
                bits as u64,
                "0 <= shift < 64",
            ))
        }
    }

    /// Reduce any amount modulo 64. Rotation is periodic, so this never
    /// changes the result of a rotate.
    #[must_use]
    pub const fn wrapping(bits: u32) -> Self {
        Self(bits % HASH_BITS)
    }

    /// Shift for a segment `depth` levels away from where the fold started.
    #[must_use]
    pub const fn for_depth(depth: u32, per_level: Self) -> Self {
        let bits = (depth as u64 * per_level.0 as u64) % HASH_BITS as u64;
        Self(bits as u32)
    }

    /// The raw rotation amount.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Shift {
    type Error = InvalidArgument;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Self::new(bits)
    }
}

/// Sign-extend a 32-bit segment to hash width.
#[inline]
const fn widen(segment: i32) -> u64 {
    segment as i64 as u64
}

/// Opaque 64-bit identity of a tree position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PositionHash(u64);

impl PositionHash {
    /// Identity element: no content hashed yet.
    pub const EMPTY: Self = Self(0);

    /// Wrap a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is [`PositionHash::EMPTY`].
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Fold a key segment in top-down: `rotl(self, shift) ^ widen(segment)`.
    #[inline]
    #[must_use]
    pub const fn compound(self, segment: i32, shift: Shift) -> Self {
        Self(self.0.rotate_left(shift.0) ^ widen(segment))
    }

    /// Fold a nested position hash in top-down (no widening).
    #[inline]
    #[must_use]
    pub const fn compound_hash(self, segment: Self, shift: Shift) -> Self {
        Self(self.0.rotate_left(shift.0) ^ segment.0)
    }

    /// Exact inverse of [`PositionHash::compound`].
    #[inline]
    #[must_use]
    pub const fn uncompound(self, segment: i32, shift: Shift) -> Self {
        Self((self.0 ^ widen(segment)).rotate_right(shift.0))
    }

    /// Exact inverse of [`PositionHash::compound_hash`].
    #[inline]
    #[must_use]
    pub const fn uncompound_hash(self, segment: Self, shift: Shift) -> Self {
        Self((self.0 ^ segment.0).rotate_right(shift.0))
    }

    /// Fold a key segment in bottom-up: `self ^ rotl(widen(segment), shift)`.
    ///
    /// `shift` must reflect the segment's distance from the leaf.
    #[inline]
    #[must_use]
    pub const fn bottom_up_compound(self, segment: i32, shift: Shift) -> Self {
        Self(self.0 ^ widen(segment).rotate_left(shift.0))
    }

    /// Fold a nested position hash in bottom-up.
    #[inline]
    #[must_use]
    pub const fn bottom_up_compound_hash(self, segment: Self, shift: Shift) -> Self {
        Self(self.0 ^ segment.0.rotate_left(shift.0))
    }
}

impl fmt::Debug for PositionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionHash({:#018x})", self.0)
    }
}

impl fmt::Display for PositionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One level of a tree path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A group key.
    Key(i32),
    /// A nested identity (e.g. the hash of a keyed sub-path).
    Hash(PositionHash),
}

impl From<i32> for Segment {
    fn from(key: i32) -> Self {
        Self::Key(key)
    }
}

impl From<PositionHash> for Segment {
    fn from(hash: PositionHash) -> Self {
        Self::Hash(hash)
    }
}

/// Incremental top-down hasher that tracks the path as it is walked.
///
/// `push` folds a segment in; `pop` removes the last one using the inverse
/// operation, so leaving a subtree restores the parent's hash without
/// recomputing it from the root.
#[derive(Debug, Clone)]
pub struct PositionHasher {
    per_level: Shift,
    root: PositionHash,
    current: PositionHash,
    path: Vec<Segment>,
}

impl PositionHasher {
    /// Start at [`PositionHash::EMPTY`].
    #[must_use]
    pub fn new(per_level: Shift) -> Self {
        Self::with_root(PositionHash::EMPTY, per_level)
    }

    /// Start below an existing identity (e.g. a subcomposition's parent).
    #[must_use]
    pub fn with_root(root: PositionHash, per_level: Shift) -> Self {
        Self {
            per_level,
            root,
            current: root,
            path: Vec::new(),
        }
    }

    /// Hash of the current position.
    #[inline]
    #[must_use]
    pub fn current(&self) -> PositionHash {
        self.current
    }

    /// Hash this hasher started from.
    #[must_use]
    pub fn root(&self) -> PositionHash {
        self.root
    }

    /// Number of segments below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Per-level shift in use.
    #[must_use]
    pub fn per_level(&self) -> Shift {
        self.per_level
    }

    /// Segments from the root down to the current position.
    #[must_use]
    pub fn path(&self) -> &[Segment] {
        &self.path
    }

    /// Descend one level.
    pub fn push(&mut self, segment: impl Into<Segment>) -> PositionHash {
        let segment = segment.into();
        self.current = match segment {
            Segment::Key(key) => self.current.compound(key, self.per_level),
            Segment::Hash(hash) => self.current.compound_hash(hash, self.per_level),
        };
        self.path.push(segment);
        self.current
    }

    /// Ascend one level, returning the segment that was removed.
    pub fn pop(&mut self) -> Option<Segment> {
        let segment = self.path.pop()?;
        self.current = match segment {
            Segment::Key(key) => self.current.uncompound(key, self.per_level),
            Segment::Hash(hash) => self.current.uncompound_hash(hash, self.per_level),
        };
        Some(segment)
    }

    /// Compute a position hash starting from the leaf and walking upward.
    ///
    /// `leaf_to_root` lists the path nearest-first; `root` is the identity
    /// the top-down walk would have started from. The result equals the
    /// top-down hash of the same path.
    #[must_use]
    pub fn bottom_up<I>(leaf_to_root: I, root: PositionHash, per_level: Shift) -> PositionHash
    where
        I: IntoIterator,
        I::Item: Into<Segment>,
    {
        let mut hash = PositionHash::EMPTY;
        let mut distance: u32 = 0;
        for segment in leaf_to_root {
            let shift = Shift::for_depth(distance, per_level);
            hash = match segment.into() {
                Segment::Key(key) => hash.bottom_up_compound(key, shift),
                Segment::Hash(nested) => hash.bottom_up_compound_hash(nested, shift),
            };
            distance = distance.wrapping_add(1);
        }
        hash.bottom_up_compound_hash(root, Shift::for_depth(distance, per_level))
    }
}

impl Default for PositionHasher {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL_SHIFT)
    }
}
