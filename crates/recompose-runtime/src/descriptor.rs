#![forbid(unsafe_code)]

//! Relocatable content descriptors.
//!
//! A [`ContentDescriptor`] is the stateless declaration of a block of
//! relocatable content: the function that produces it and the shape of the
//! parameters it takes. It owns no retained state. Descriptors live in a
//! [`DescriptorArena`] and are identified by a [`DescriptorId`], which is
//! the key the relocation pool matches departures and placements on.
//!
//! Registration never deduplicates: two call sites registering identical
//! functions get distinct ids, exactly as two distinct declarations would
//! have distinct identities.
//!
//! # Usage
//!
//! ```
//! use recompose_runtime::descriptor::{DescriptorArena, ParamPacking, ParamShape};
//!
//! let mut arena = DescriptorArena::new();
//! let id = arena.register("row", ParamShape::for_arity(2), |a: u32, b: u32| a + b);
//! let row = arena.get(id).unwrap();
//! assert_eq!(row.shape().packing(), ParamPacking::Pair);
//! assert_eq!((row.content())(1, 2), 3);
//! ```

use std::fmt;

/// Stable identity of a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(u32);

impl DescriptorId {
    /// Rebuild an id from its raw index.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Index into per-descriptor tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a descriptor's parameters are carried between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamPacking {
    /// No parameters.
    Unit,
    /// A single value, stored as-is.
    Direct,
    /// Two values packed as a pair.
    Pair,
    /// Three values packed as a triple.
    Triple,
    /// Four or more values packed into a boxed slice.
    Boxed,
}

/// Parameter arity and packing of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamShape {
    arity: u8,
    packing: ParamPacking,
}

impl ParamShape {
    /// Shape for `arity` parameters with the packing that arity implies.
    #[must_use]
    pub const fn for_arity(arity: u8) -> Self {
        let packing = match arity {
            0 => ParamPacking::Unit,
            1 => ParamPacking::Direct,
            2 => ParamPacking::Pair,
            3 => ParamPacking::Triple,
            _ => ParamPacking::Boxed,
        };
        Self { arity, packing }
    }

    /// Number of parameters.
    #[must_use]
    pub const fn arity(self) -> u8 {
        self.arity
    }

    /// Packing strategy.
    #[must_use]
    pub const fn packing(self) -> ParamPacking {
        self.packing
    }
}

/// A registered content declaration.
pub struct ContentDescriptor<F> {
    id: DescriptorId,
    name: &'static str,
    shape: ParamShape,
    content: F,
}

impl<F> ContentDescriptor<F> {
    /// Identity used for relocation matching.
    #[must_use]
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Declaration name (diagnostics only; not part of identity).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parameter shape.
    #[must_use]
    pub fn shape(&self) -> ParamShape {
        self.shape
    }

    /// The content-producing function.
    #[must_use]
    pub fn content(&self) -> &F {
        &self.content
    }
}

impl<F> fmt::Debug for ContentDescriptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Owner of every descriptor, handing out stable ids.
pub struct DescriptorArena<F> {
    descriptors: Vec<ContentDescriptor<F>>,
}

impl<F> DescriptorArena<F> {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Register a declaration and return its identity.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` descriptors are registered.
    pub fn register(&mut self, name: &'static str, shape: ParamShape, content: F) -> DescriptorId {
        let raw = u32::try_from(self.descriptors.len()).expect("descriptor arena exhausted");
        let id = DescriptorId(raw);
        self.descriptors.push(ContentDescriptor {
            id,
            name,
            shape,
            content,
        });
        id
    }

    /// Look up a descriptor.
    #[must_use]
    pub fn get(&self, id: DescriptorId) -> Option<&ContentDescriptor<F>> {
        self.descriptors.get(id.index())
    }

    /// Whether `id` was issued by this arena.
    #[must_use]
    pub fn contains(&self, id: DescriptorId) -> bool {
        id.index() < self.descriptors.len()
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentDescriptor<F>> {
        self.descriptors.iter()
    }
}

impl<F> Default for DescriptorArena<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> fmt::Debug for DescriptorArena<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.descriptors.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_follows_arity() {
        assert_eq!(ParamShape::for_arity(0).packing(), ParamPacking::Unit);
        assert_eq!(ParamShape::for_arity(1).packing(), ParamPacking::Direct);
        assert_eq!(ParamShape::for_arity(2).packing(), ParamPacking::Pair);
        assert_eq!(ParamShape::for_arity(3).packing(), ParamPacking::Triple);
        assert_eq!(ParamShape::for_arity(4).packing(), ParamPacking::Boxed);
        assert_eq!(ParamShape::for_arity(9).arity(), 9);
    }

    #[test]
    fn ids_are_sequential_and_stable() {
        let mut arena: DescriptorArena<fn() -> u8> = DescriptorArena::new();
        let a = arena.register("a", ParamShape::for_arity(0), || 1);
        let b = arena.register("b", ParamShape::for_arity(0), || 2);
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert_eq!(arena.get(a).unwrap().name(), "a");
        assert_eq!((arena.get(b).unwrap().content())(), 2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn identical_declarations_get_distinct_ids() {
        let mut arena: DescriptorArena<fn() -> u8> = DescriptorArena::new();
        let a = arena.register("same", ParamShape::for_arity(0), || 1);
        let b = arena.register("same", ParamShape::for_arity(0), || 1);
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_id_is_absent() {
        let arena: DescriptorArena<fn()> = DescriptorArena::default();
        assert!(arena.is_empty());
        assert!(arena.get(DescriptorId::from_raw(3)).is_none());
        assert!(!arena.contains(DescriptorId::from_raw(0)));
    }

    #[test]
    fn display_and_debug() {
        let mut arena: DescriptorArena<fn()> = DescriptorArena::new();
        let id = arena.register("card", ParamShape::for_arity(1), || {});
        assert_eq!(id.to_string(), "#0");
        let dbg = format!("{:?}", arena);
        assert!(dbg.contains("card"));
    }
}
