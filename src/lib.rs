#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

/// The public map type built on the hopscotch bucket table.
///
/// This module provides [`HopMap`], its stable [`Handle`]s, iterators, and
/// the [`Error`] type shared by the fallible operations.
pub mod map;

mod table;

pub use map::Error;
pub use map::Handle;
pub use map::HopMap;
pub use map::Iter;
pub use map::IterMut;
pub use map::Keys;
pub use map::Values;
