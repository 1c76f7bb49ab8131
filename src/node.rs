//! The contract between the reconciler and concrete node kinds.
//!
//! A node kind is any `'static` type implementing [`VirtualNode`].
//! Its instances are created by render output (as [`Content::Node`]) and, once mounted, owned by a [`Tree`](`crate::tree::Tree`),
//! which addresses them by [`NodeId`].
//!
//! Structural concerns (positioning, platform node queries, scheduling) are handled by the [`Tree`](`crate::tree::Tree`) for all kinds alike.
//! A kind only implements the hooks that differ between kinds.

use crate::{
	children::ChildrenUpdateRequest,
	disp::UpdateStrategy,
	error::AppError,
	platform::Platform,
	scheduler::{ScheduledCall, Scheduler, SchedulingType},
};
use core::{
	any::{Any, TypeId},
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use std::{borrow::Cow, rc::Rc};

slotmap::new_key_type! {
	/// Identifies a mounted node within its [`Tree`](`crate::tree::Tree`).
	///
	/// Ids are not reused after the node is unmounted.
	pub struct NodeId;
}

/// An explicit, user-supplied identity used to match old and new nodes across renders independent of position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
	Int(i64),
	Str(Cow<'static, str>),
}
impl From<i64> for Key {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}
impl From<i32> for Key {
	fn from(value: i32) -> Self {
		Self::Int(value.into())
	}
}
impl From<u32> for Key {
	fn from(value: u32) -> Self {
		Self::Int(value.into())
	}
}
impl From<&'static str> for Key {
	fn from(value: &'static str) -> Self {
		Self::Str(Cow::Borrowed(value))
	}
}
impl From<String> for Key {
	fn from(value: String) -> Self {
		Self::Str(Cow::Owned(value))
	}
}

/// Upcasts to [`Any`], for downcasting in [`VirtualNode::update`]. Implemented for all `'static` types.
pub trait AsAny {
	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;
	fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
impl<T: Any> AsAny for T {
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}

	fn into_any(self: Box<Self>) -> Box<dyn Any> {
		self
	}
}

/// The kind discriminant of a node: Only nodes of the same kind are ever considered for [`VirtualNode::update`].
///
/// Note that this must be called on the node itself, not on a [`Box`] containing it.
#[must_use]
pub fn kind_of<P: Platform>(node: &dyn VirtualNode<P>) -> TypeId {
	node.as_any().type_id()
}

/// One entry of render output.
pub enum Content<P: Platform> {
	/// A newly rendered node, which is either matched against a previous one or mounted.
	Node(Box<dyn VirtualNode<P>>),
	/// One of the rendering node's current children, reused as-is.
	Retain(NodeId),
}
impl<P: Platform> Content<P> {
	pub fn node(node: impl VirtualNode<P> + 'static) -> Self {
		Self::Node(Box::new(node))
	}
}
impl<P: Platform> Debug for Content<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Content::Node(node) => f.debug_tuple("Node").field(&node.name()).finish(),
			Content::Retain(id) => f.debug_tuple("Retain").field(id).finish(),
		}
	}
}

/// The result of [`VirtualNode::render`].
pub enum RenderOutcome<P: Platform> {
	Ready(Vec<Content<P>>),
	/// The content can't be rendered yet.
	/// The nearest error boundary shows a placeholder until the [`Suspension`] is resolved.
	Suspended(Suspension),
	Failed(AppError),
}

/// A "not ready yet" signal, resolved by whoever produces the missing data.
#[derive(Clone)]
pub struct Suspension(Rc<SuspensionState>);
struct SuspensionState {
	label: Cow<'static, str>,
	resolved: Cell<bool>,
	waker: RefCell<Option<Rc<dyn Fn()>>>,
}
impl Suspension {
	pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
		Self(Rc::new(SuspensionState {
			label: label.into(),
			resolved: Cell::new(false),
			waker: RefCell::new(None),
		}))
	}

	#[must_use]
	pub fn label(&self) -> &str {
		&self.0.label
	}

	#[must_use]
	pub fn is_resolved(&self) -> bool {
		self.0.resolved.get()
	}

	/// Marks the awaited data as available.
	///
	/// The error boundary that parked this suspension is updated during the next tick.
	pub fn resolve(&self) {
		if self.0.resolved.replace(true) {
			return;
		}
		let waker = self.0.waker.borrow_mut().take();
		if let Some(waker) = waker {
			waker()
		}
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	pub(crate) fn set_waker(&self, waker: Option<Rc<dyn Fn()>>) {
		*self.0.waker.borrow_mut() = waker;
	}
}
impl Debug for Suspension {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Suspension").field("label", &self.label()).field("resolved", &self.is_resolved()).finish()
	}
}

/// What an [`ErrorBoundary`] is told about.
#[derive(Debug)]
pub enum RenderFailure {
	Error(AppError),
	Suspended(Suspension),
}

/// A node service that takes over when a descendant fails to render.
///
/// After [`report_error`](`ErrorBoundary::report_error`) returns, the boundary node is re-rendered during the next tick,
/// so it should switch to fallback (or placeholder) content here.
pub trait ErrorBoundary {
	/// `path` lists node names from the root to the failing node.
	fn report_error(&mut self, failure: &RenderFailure, path: &[String]);
}

/// Kind-specific behaviour of a virtual node.
///
/// All hooks have defaults, so a pure composition kind only needs [`render`](`VirtualNode::render`)
/// and a leaf kind only [`mount`](`VirtualNode::mount`).
pub trait VirtualNode<P: Platform>: AsAny {
	/// Human-readable name for diagnostics.
	fn name(&self) -> Cow<'static, str> {
		Cow::Borrowed("VirtualNode")
	}

	fn key(&self) -> Option<&Key> {
		None
	}

	/// Strategy for reconciling this node's children. [`None`] inherits the nearest ancestor's.
	fn update_strategy(&self) -> Option<UpdateStrategy> {
		None
	}

	/// Materializes this node's own platform node, if it has one.
	///
	/// The returned handle is inserted into the tree by the caller after the children were mounted into it.
	/// Nodes without own platform node delegate positioning to their children.
	fn mount(&mut self, ctx: &mut Context<'_, P>) -> Option<P::Handle> {
		let _ = ctx;
		None
	}

	/// Called before the node's children are unmounted and its platform node is removed.
	fn unmount(&mut self, ctx: &mut Context<'_, P>) {
		let _ = ctx;
	}

	/// Whether this node can absorb `new` through [`update`](`VirtualNode::update`).
	///
	/// Only called for nodes of the same kind as `self`.
	fn is_update_possible(&self, new: &dyn VirtualNode<P>) -> bool {
		let _ = new;
		true
	}

	/// Absorbs the properties of `new`, which is of the same kind as `self`.
	///
	/// Returns whether the children must be re-rendered.
	///
	/// # Errors
	///
	/// Errors are reported to the nearest [`ErrorBoundary`].
	fn update(&mut self, new: Box<dyn VirtualNode<P>>, ctx: &mut Context<'_, P>) -> Result<bool, AppError> {
		let _ = (new, ctx);
		Ok(false)
	}

	fn render(&mut self, ctx: &mut Context<'_, P>) -> RenderOutcome<P> {
		let _ = ctx;
		RenderOutcome::Ready(Vec::new())
	}

	/// Updates something about the node that doesn't affect its children.
	///
	/// # Errors
	///
	/// Errors are reported to the nearest [`ErrorBoundary`].
	fn perform_partial_update(&mut self, ctx: &mut Context<'_, P>) -> Result<(), AppError> {
		let _ = ctx;
		Ok(())
	}

	fn as_error_boundary(&mut self) -> Option<&mut dyn ErrorBoundary> {
		None
	}
}

/// Access to the current node's platform node and to the scheduler, passed to [`VirtualNode`] hooks.
///
/// Requests made through a [`Context`] always arrive while the scheduler is busy,
/// so they are batched into the next tick (or, for [`SchedulingType::Sync`], run right after the current one).
pub struct Context<'a, P: Platform> {
	pub(crate) node: NodeId,
	pub(crate) own_dn: Option<&'a P::Handle>,
	pub(crate) platform: &'a mut P,
	pub(crate) scheduler: &'a mut Scheduler<P>,
}
impl<'a, P: Platform> Context<'a, P> {
	/// The node the current hook is called on.
	#[must_use]
	pub fn node(&self) -> NodeId {
		self.node
	}

	/// The node's own platform node. Always [`None`] during [`VirtualNode::mount`].
	#[must_use]
	pub fn own_dn(&self) -> Option<&P::Handle> {
		self.own_dn
	}

	pub fn platform(&mut self) -> &mut P {
		self.platform
	}

	/// The current tick number.
	#[must_use]
	pub fn tick(&self) -> u64 {
		self.scheduler.tick()
	}

	pub fn request_update(&mut self, node: NodeId, timing: SchedulingType) {
		self.scheduler.enqueue_full(node, None);
		self.scheduler.request_tick(timing);
	}

	pub fn request_partial_update(&mut self, node: NodeId, timing: SchedulingType) {
		self.scheduler.enqueue_partial(node);
		self.scheduler.request_tick(timing);
	}

	pub fn request_children_update(&mut self, node: NodeId, request: ChildrenUpdateRequest<P>, timing: SchedulingType) {
		self.scheduler.enqueue_full(node, Some(request));
		self.scheduler.request_tick(timing);
	}

	pub fn schedule_call(&mut self, call: ScheduledCall<P>, before_update: bool, timing: SchedulingType) {
		self.scheduler.add_call(call, before_update);
		self.scheduler.request_tick(timing);
	}
}
