//! Type metadata shared by the planner and the runtimes.
//!
//! Stages declare their expected output through a [`TypeId`] pointing into a
//! [`TypeGraph`]. Runtimes dispatch on [`TypeNode`] variants, so adding a kind
//! is a compile-time visible change for every runtime.

mod graph;
mod node;

pub use graph::{TypeError, TypeGraph};
pub use node::{FloatBound, FloatConstraints, IntegerConstraints, StringConstraints, StringFormat, TypeId, TypeNode};
