//! The small slice of a platform tree API that reconciliation needs.
//!
//! Creating platform nodes is left to the node kinds themselves (see [`VirtualNode::mount`](`crate::node::VirtualNode::mount`)),
//! since what can be created differs wildly between platforms. Everything positional goes through [`Platform`].

use core::fmt::Debug;

pub mod memory;
pub mod web;

/// A live tree that virtual nodes are materialized into.
pub trait Platform: 'static {
	/// A reference to one platform node. Cloning must be cheap and must not duplicate the node itself.
	type Handle: Clone + PartialEq + Debug + 'static;
	type Error: Debug;

	/// Inserts `node` as child of `parent` right before `before`, or as last child if `before` is [`None`].
	///
	/// If `node` is already attached anywhere, it is moved.
	///
	/// # Errors
	///
	/// Iff the platform rejects the operation, for example because `before` isn't a child of `parent`.
	fn insert_before(&mut self, parent: &Self::Handle, node: &Self::Handle, before: Option<&Self::Handle>) -> Result<(), Self::Error>;

	/// Detaches `node` from its parent, if it has one.
	///
	/// # Errors
	///
	/// Iff the platform rejects the operation.
	fn remove(&mut self, node: &Self::Handle) -> Result<(), Self::Error>;

	fn next_sibling(&self, node: &Self::Handle) -> Option<Self::Handle>;
}
