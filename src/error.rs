//! Error types.
//!
//! Most failures in this crate are not returned at all: like platform call failures they are logged through [`tracing`]
//! and the current pass continues. The types here cover the remaining cases where a caller can reasonably react.

use crate::node::NodeId;
use core::ops::Range;
use thiserror::Error;

/// Opaque application error raised by node hooks and scheduled callbacks.
pub type AppError = Box<dyn std::error::Error>;

/// Rejected [`ChildrenUpdateRequest`](`crate::children::ChildrenUpdateRequest`) parameters.
///
/// These are only returned in builds with `debug_assertions`.
/// Release builds clamp the request to the nearest valid one and log a warning instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChildrenError {
	#[error("node {0:?} is not mounted")]
	NotMounted(NodeId),
	#[error("range {start}..{end} is out of bounds for {len} children")]
	OutOfBounds { start: usize, end: usize, len: usize },
	#[error("shifting {count} children at {start} by {shift} leaves the bounds of {len} children")]
	InvalidShift { start: usize, count: usize, shift: isize, len: usize },
	#[error("ranges {first:?} and {second:?} intersect")]
	Intersecting { first: Range<usize>, second: Range<usize> },
}

/// Failures of the in-memory platform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
	#[error("unknown handle #{0}")]
	UnknownHandle(usize),
	#[error("reference node #{before} is not a child of #{parent}")]
	NotAChild { parent: usize, before: usize },
	#[error("inserting #{node} into #{parent} would create a cycle")]
	Cycle { parent: usize, node: usize },
}
