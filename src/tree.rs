//! The arena that owns all mounted virtual nodes of one or more roots, together with their platform and [`Scheduler`].

use crate::{
	children::ChildrenUpdateRequest,
	disp::{build_sub_node_dispositions, UpdateStrategy},
	node::{Content, Context, Key, NodeId, RenderFailure, RenderOutcome, VirtualNode},
	platform::Platform,
	scheduler::{ScheduledCall, Scheduler, SchedulerState, SchedulingType, TickDriver},
};
use core::{any::Any, mem, ops::Range};
use slotmap::SlotMap;
use std::borrow::Cow;
use tracing::{error, instrument, trace, trace_span, warn};

/// Bookkeeping for one mounted node.
pub(crate) struct NodeSlot<P: Platform> {
	pub(crate) behavior: Box<dyn VirtualNode<P>>,
	pub(crate) name: Cow<'static, str>,
	pub(crate) key: Option<Key>,
	/// Back reference only. Parents own their children.
	pub(crate) parent: Option<NodeId>,
	pub(crate) index: usize,
	pub(crate) depth: usize,
	pub(crate) sub_nodes: Vec<NodeId>,
	/// The platform node this node's content is inserted into.
	pub(crate) anchor_dn: P::Handle,
	pub(crate) own_dn: Option<P::Handle>,
	/// For roots: What the root's content is inserted before.
	pub(crate) root_before: Option<P::Handle>,
	pub(crate) update_strategy: Option<UpdateStrategy>,
	pub(crate) last_update_tick: u64,
}

/// Owns a forest of mounted virtual nodes, the platform they are materialized into and the [`Scheduler`] that drives their updates.
///
/// # Correct Use
///
/// All mutation goes through this type, so it's impossible to observe a half-updated tree from outside.
/// Node hooks can't access the tree directly; They request work through their [`Context`] instead.
pub struct Tree<P: Platform> {
	pub(crate) nodes: SlotMap<NodeId, NodeSlot<P>>,
	pub(crate) platform: P,
	pub(crate) scheduler: Scheduler<P>,
}

impl<P: Platform> Tree<P> {
	#[must_use]
	pub fn new(platform: P, driver: Box<dyn TickDriver>) -> Self {
		Self {
			nodes: SlotMap::with_key(),
			platform,
			scheduler: Scheduler::new(driver),
		}
	}

	pub fn platform(&self) -> &P {
		&self.platform
	}

	pub fn platform_mut(&mut self) -> &mut P {
		&mut self.platform
	}

	pub(crate) fn slot(&self, id: NodeId) -> Option<&NodeSlot<P>> {
		self.nodes.get(id)
	}

	#[must_use]
	pub fn is_mounted(&self, id: NodeId) -> bool {
		self.nodes.contains_key(id)
	}

	/// The number of mounted nodes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	#[must_use]
	pub fn children(&self, id: NodeId) -> &[NodeId] {
		self.nodes.get(id).map_or(&[], |slot| &slot.sub_nodes)
	}

	#[must_use]
	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.nodes.get(id)?.parent
	}

	#[must_use]
	pub fn index(&self, id: NodeId) -> Option<usize> {
		self.nodes.get(id).map(|slot| slot.index)
	}

	#[must_use]
	pub fn depth(&self, id: NodeId) -> Option<usize> {
		self.nodes.get(id).map(|slot| slot.depth)
	}

	#[must_use]
	pub fn name(&self, id: NodeId) -> Option<&str> {
		self.nodes.get(id).map(|slot| &*slot.name)
	}

	#[must_use]
	pub fn key(&self, id: NodeId) -> Option<&Key> {
		self.nodes.get(id)?.key.as_ref()
	}

	/// The tick during which `id`'s children were last re-rendered.
	#[must_use]
	pub fn last_update_tick(&self, id: NodeId) -> Option<u64> {
		self.nodes.get(id).map(|slot| slot.last_update_tick)
	}

	#[must_use]
	pub fn anchor_dn(&self, id: NodeId) -> Option<&P::Handle> {
		self.nodes.get(id).map(|slot| &slot.anchor_dn)
	}

	#[must_use]
	pub fn own_dn(&self, id: NodeId) -> Option<&P::Handle> {
		self.nodes.get(id)?.own_dn.as_ref()
	}

	/// Borrows the node's behaviour as concrete kind `T`.
	#[must_use]
	pub fn node<T: Any>(&self, id: NodeId) -> Option<&T> {
		self.nodes.get(id)?.behavior.as_ref().as_any().downcast_ref()
	}

	/// Mutably borrows the node's behaviour as concrete kind `T`.
	///
	/// Changes made this way only show up once the node is updated.
	pub fn node_mut<T: Any>(&mut self, id: NodeId) -> Option<&mut T> {
		self.nodes.get_mut(id)?.behavior.as_mut().as_any_mut().downcast_mut()
	}

	/// The update strategy in effect for `id`'s children: Its own, else the nearest ancestor's, else the default.
	#[must_use]
	pub fn effective_update_strategy(&self, mut id: NodeId) -> UpdateStrategy {
		while let Some(slot) = self.nodes.get(id) {
			if let Some(strategy) = slot.update_strategy {
				return strategy;
			}
			match slot.parent {
				Some(parent) => id = parent,
				None => break,
			}
		}
		UpdateStrategy::default()
	}

	/// Node names from the root down to `id`.
	#[must_use]
	pub fn path(&self, id: NodeId) -> Vec<String> {
		let mut path = Vec::new();
		let mut current = Some(id);
		while let Some(slot) = current.and_then(|id| self.nodes.get(id)) {
			path.push(slot.name.to_string());
			current = slot.parent;
		}
		path.reverse();
		path
	}

	/// The first platform node of `id`'s content: Its own, or else the first one among its descendants.
	#[must_use]
	pub fn first_dn(&self, id: NodeId) -> Option<P::Handle> {
		let slot = self.nodes.get(id)?;
		match &slot.own_dn {
			Some(own_dn) => Some(own_dn.clone()),
			None => slot.sub_nodes.iter().find_map(|&child| self.first_dn(child)),
		}
	}

	/// The last platform node of `id`'s content: Its own, or else the last one among its descendants.
	#[must_use]
	pub fn last_dn(&self, id: NodeId) -> Option<P::Handle> {
		let slot = self.nodes.get(id)?;
		match &slot.own_dn {
			Some(own_dn) => Some(own_dn.clone()),
			None => slot.sub_nodes.iter().rev().find_map(|&child| self.last_dn(child)),
		}
	}

	/// All platform nodes that are direct children of `id`'s anchor on `id`'s behalf, in order.
	#[must_use]
	pub fn immediate_dns(&self, id: NodeId) -> Vec<P::Handle> {
		let mut dns = Vec::new();
		self.collect_immediate_dns(id, &mut dns);
		dns
	}

	fn collect_immediate_dns(&self, id: NodeId, dns: &mut Vec<P::Handle>) {
		if let Some(slot) = self.nodes.get(id) {
			match &slot.own_dn {
				Some(own_dn) => dns.push(own_dn.clone()),
				None => {
					for &child in &slot.sub_nodes {
						self.collect_immediate_dns(child, dns)
					}
				}
			}
		}
	}

	/// The platform node right after `id`'s content within its anchor, if any.
	///
	/// Only meaningful while the tree is consistent, i.e. not in the middle of reconciling one of `id`'s ancestors.
	#[must_use]
	pub fn following_dn(&self, mut id: NodeId) -> Option<P::Handle> {
		loop {
			let slot = self.nodes.get(id)?;
			let parent_id = match slot.parent {
				Some(parent) => parent,
				None => return slot.root_before.clone(),
			};
			let parent = self.nodes.get(parent_id)?;
			if let Some(dn) = parent.sub_nodes.get(slot.index + 1..).and_then(|siblings| siblings.iter().find_map(|&sibling| self.first_dn(sibling))) {
				return Some(dn);
			}
			if parent.own_dn.is_some() {
				return None;
			}
			id = parent_id;
		}
	}

	/// Where `id`'s children are inserted: Into its own platform node, or else in place of `id` itself.
	pub(crate) fn children_region(&self, id: NodeId) -> Option<(P::Handle, Option<P::Handle>)> {
		let slot = self.nodes.get(id)?;
		Some(match &slot.own_dn {
			Some(own_dn) => (own_dn.clone(), None),
			None => (slot.anchor_dn.clone(), self.following_dn(id)),
		})
	}

	/// The platform node that content inserted at child position `index` of `id` goes before.
	pub(crate) fn dn_before_child(&self, id: NodeId, index: usize) -> Option<P::Handle> {
		let slot = self.nodes.get(id)?;
		if let Some(dn) = slot.sub_nodes.get(index..).and_then(|children| children.iter().find_map(|&child| self.first_dn(child))) {
			return Some(dn);
		}
		match slot.own_dn {
			Some(_) => None,
			None => self.following_dn(id),
		}
	}

	/// Mounts `root` into `anchor`, before `before` or at the end.
	///
	/// Runs synchronously. Update requests made by hooks during mounting are batched as usual.
	#[instrument(skip(self, root))]
	pub fn mount_root(&mut self, root: Box<dyn VirtualNode<P>>, anchor: P::Handle, before: Option<P::Handle>) -> NodeId {
		self.run_update(|tree| {
			let id = tree.mount_node(None, 0, root, anchor, before.as_ref());
			if let Some(slot) = tree.nodes.get_mut(id) {
				slot.root_before = before;
			}
			id
		})
	}

	/// Unmounts `root` and removes its content from the platform.
	#[instrument(skip(self))]
	pub fn unmount_root(&mut self, root: NodeId) {
		if self.parent(root).is_some() {
			return error!("{:?} is not a root. Ignoring.", root);
		}
		self.run_update(|tree| tree.unmount_node(root, true))
	}

	/// Runs `f` as part of an update batch, so that requests made meanwhile are collected instead of acted upon.
	pub(crate) fn run_update<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
		if self.scheduler.state() != SchedulerState::Idle {
			return f(self);
		}
		self.scheduler.set_state(SchedulerState::Update);
		let result = f(self);
		self.scheduler.set_state(SchedulerState::Idle);
		if self.finish_batch() {
			self.perform_tick()
		}
		result
	}

	/// Creates the slot for `behavior`, materializes it and its children and inserts it before `before`.
	pub(crate) fn mount_node(&mut self, parent: Option<NodeId>, index: usize, behavior: Box<dyn VirtualNode<P>>, anchor: P::Handle, before: Option<&P::Handle>) -> NodeId {
		let depth = parent.and_then(|parent| self.nodes.get(parent)).map_or(0, |parent| parent.depth + 1);
		let name = behavior.name();
		let span = trace_span!("Mounting", depth, index);
		let _enter = span.enter();
		if cfg!(feature = "dangerous-logging") {
			trace!("Mounting {}.", name);
		}

		let id = self.nodes.insert(NodeSlot {
			key: behavior.key().cloned(),
			update_strategy: behavior.update_strategy(),
			behavior,
			name,
			parent,
			index,
			depth,
			sub_nodes: Vec::new(),
			anchor_dn: anchor.clone(),
			own_dn: None,
			root_before: None,
			last_update_tick: self.scheduler.tick(),
		});

		let own_dn = match self.nodes.get_mut(id) {
			Some(slot) => slot.behavior.mount(&mut Context {
				node: id,
				own_dn: None,
				platform: &mut self.platform,
				scheduler: &mut self.scheduler,
			}),
			None => None,
		};
		if let Some(slot) = self.nodes.get_mut(id) {
			slot.own_dn = own_dn.clone();
		}

		let content = self.render_node(id).unwrap_or_default();
		let (child_anchor, child_before) = match &own_dn {
			Some(own_dn) => (own_dn.clone(), None),
			None => (anchor.clone(), before.cloned()),
		};
		let mut sub_nodes = Vec::with_capacity(content.len());
		for content in content {
			match content {
				Content::Node(child) => sub_nodes.push(self.mount_node(Some(id), sub_nodes.len(), child, child_anchor.clone(), child_before.as_ref())),
				Content::Retain(retained) => error!("Can't retain {:?} while mounting {:?}, which has no children yet. Skipping it.", retained, id),
			}
		}
		if let Some(slot) = self.nodes.get_mut(id) {
			slot.sub_nodes = sub_nodes;
		}

		if let Some(own_dn) = own_dn {
			if let Err(error) = self.platform.insert_before(&anchor, &own_dn, before) {
				error!("Failed to insert platform node of {:?}: {:?}", id, error);
			}
		}
		id
	}

	/// Unmounts `id` and its descendants, children first.
	///
	/// Platform nodes are only removed where necessary: Descendants of a removed platform node go with it.
	pub(crate) fn unmount_node(&mut self, id: NodeId, remove_from_platform: bool) {
		let (sub_nodes, own_dn) = match self.nodes.get_mut(id) {
			Some(slot) => {
				slot.behavior.unmount(&mut Context {
					node: id,
					own_dn: slot.own_dn.as_ref(),
					platform: &mut self.platform,
					scheduler: &mut self.scheduler,
				});
				(mem::take(&mut slot.sub_nodes), slot.own_dn.clone())
			}
			None => return warn!("Tried to unmount {:?}, which isn't mounted.", id),
		};

		let remove_children = remove_from_platform && own_dn.is_none();
		for child in sub_nodes {
			self.unmount_node(child, remove_children)
		}

		if remove_from_platform {
			if let Some(own_dn) = own_dn {
				if let Err(error) = self.platform.remove(&own_dn) {
					error!("Failed to remove platform node of {:?}: {:?}", id, error);
				}
			}
		}

		self.nodes.remove(id);
		self.scheduler.forget(id);
	}

	/// Calls `id`'s render hook. Failures are reported and yield [`None`].
	pub(crate) fn render_node(&mut self, id: NodeId) -> Option<Vec<Content<P>>> {
		let outcome = {
			let slot = self.nodes.get_mut(id)?;
			slot.behavior.render(&mut Context {
				node: id,
				own_dn: slot.own_dn.as_ref(),
				platform: &mut self.platform,
				scheduler: &mut self.scheduler,
			})
		};
		match outcome {
			RenderOutcome::Ready(content) => Some(content),
			RenderOutcome::Suspended(suspension) => {
				self.report_failure(id, RenderFailure::Suspended(suspension));
				None
			}
			RenderOutcome::Failed(error) => {
				self.report_failure(id, RenderFailure::Error(error));
				None
			}
		}
	}

	/// Lets `id` absorb `new`, re-rendering its children if it asks for it.
	///
	/// `before` is what `id`'s content is (already) placed before, used for children of nodes without own platform node.
	pub(crate) fn update_node(&mut self, id: NodeId, new: Box<dyn VirtualNode<P>>, before: Option<P::Handle>) {
		let new_key = new.key().cloned();
		let new_strategy = new.update_strategy();
		let result = match self.nodes.get_mut(id) {
			Some(slot) => {
				let result = slot.behavior.update(
					new,
					&mut Context {
						node: id,
						own_dn: slot.own_dn.as_ref(),
						platform: &mut self.platform,
						scheduler: &mut self.scheduler,
					},
				);
				slot.key = new_key;
				slot.update_strategy = new_strategy;
				result
			}
			None => return warn!("Tried to update {:?}, which isn't mounted.", id),
		};

		match result {
			Ok(true) => self.rerender_before(id, before),
			Ok(false) => trace!("{:?} skipped re-rendering.", id),
			Err(error) => self.report_failure(id, RenderFailure::Error(error)),
		}
	}

	/// Re-renders `id`'s children in place.
	pub(crate) fn rerender(&mut self, id: NodeId) {
		let before = match self.nodes.get(id) {
			Some(slot) if slot.own_dn.is_none() => self.following_dn(id),
			Some(_) => None,
			None => return,
		};
		self.rerender_before(id, before)
	}

	fn rerender_before(&mut self, id: NodeId, before: Option<P::Handle>) {
		let (anchor, before) = match self.nodes.get_mut(id) {
			Some(slot) => {
				slot.last_update_tick = self.scheduler.tick();
				match &slot.own_dn {
					Some(own_dn) => (own_dn.clone(), None),
					None => (slot.anchor_dn.clone(), before),
				}
			}
			None => return,
		};
		if let Some(content) = self.render_node(id) {
			let len = self.children(id).len();
			let strategy = self.effective_update_strategy(id);
			self.reconcile_children(id, 0..len, content, strategy, &anchor, before);
		}
	}

	/// Reconciles `id`'s children in `range` against `content`, updating both the platform and the child list.
	pub(crate) fn reconcile_children(&mut self, id: NodeId, range: Range<usize>, content: Vec<Content<P>>, strategy: UpdateStrategy, anchor: &P::Handle, before: Option<P::Handle>) {
		let old = self.children(id).to_vec();
		let disp = build_sub_node_dispositions(self, &old, range.clone(), content, strategy);
		let new_ids = self.apply_disposition(id, disp, anchor, before);
		self.replace_children(id, range, new_ids);
	}

	/// Replaces `id`'s child list in `range` and fixes up indices.
	pub(crate) fn replace_children(&mut self, id: NodeId, range: Range<usize>, new_ids: Vec<NodeId>) {
		let start = range.start;
		let sub_nodes = match self.nodes.get_mut(id) {
			Some(slot) => {
				slot.sub_nodes.splice(range, new_ids);
				slot.sub_nodes[start..].to_vec()
			}
			None => return,
		};
		self.reindex(&sub_nodes, start);
	}

	pub(crate) fn reindex(&mut self, children: &[NodeId], start: usize) {
		for (offset, &child) in children.iter().enumerate() {
			if let Some(slot) = self.nodes.get_mut(child) {
				slot.index = start + offset;
			}
		}
	}

	/// Hands `failure` to the nearest ancestor of `id` that is an error boundary, and schedules that boundary for update.
	#[instrument(skip(self, failure))]
	pub(crate) fn report_failure(&mut self, id: NodeId, failure: RenderFailure) {
		let path = self.path(id);
		let mut current = self.parent(id);
		while let Some(ancestor) = current {
			let (handled, parent) = match self.nodes.get_mut(ancestor) {
				Some(slot) => (
					match slot.behavior.as_error_boundary() {
						Some(boundary) => {
							boundary.report_error(&failure, &path);
							true
						}
						None => false,
					},
					slot.parent,
				),
				None => break,
			};

			if handled {
				trace!("{:?} handled the failure of {:?}.", ancestor, id);
				if let RenderFailure::Suspended(suspension) = failure {
					self.scheduler.park(suspension, ancestor);
				}
				self.scheduler.enqueue_full(ancestor, None);
				self.scheduler.request_tick(SchedulingType::default());
				return;
			}
			current = parent;
		}

		match failure {
			RenderFailure::Error(error) => error!("Unhandled render failure at {}: {}", path.join(" > "), error),
			RenderFailure::Suspended(suspension) => error!("Unhandled suspension {:?} at {}. Nothing will be shown until it's re-rendered.", suspension.label(), path.join(" > ")),
		}
	}

	/// Schedules a full update of `id` (a re-render of its children).
	#[instrument(skip(self))]
	pub fn request_update(&mut self, id: NodeId, timing: SchedulingType) {
		if !self.is_mounted(id) {
			return warn!("Update requested for {:?}, which isn't mounted. Ignoring.", id);
		}
		self.scheduler.enqueue_full(id, None);
		if self.scheduler.request_tick(timing) {
			self.perform_tick()
		}
	}

	/// Schedules [`VirtualNode::perform_partial_update`] for `id`.
	#[instrument(skip(self))]
	pub fn request_partial_update(&mut self, id: NodeId, timing: SchedulingType) {
		if !self.is_mounted(id) {
			return warn!("Partial update requested for {:?}, which isn't mounted. Ignoring.", id);
		}
		self.scheduler.enqueue_partial(id);
		if self.scheduler.request_tick(timing) {
			self.perform_tick()
		}
	}

	/// Schedules `request` to be applied to `id`'s children, instead of re-rendering them.
	///
	/// This replaces any other full update request for `id` pending in the same tick.
	#[instrument(skip(self))]
	pub fn request_children_update(&mut self, id: NodeId, request: ChildrenUpdateRequest<P>, timing: SchedulingType) {
		if !self.is_mounted(id) {
			return warn!("Children update requested for {:?}, which isn't mounted. Ignoring.", id);
		}
		self.scheduler.enqueue_full(id, Some(request));
		if self.scheduler.request_tick(timing) {
			self.perform_tick()
		}
	}

	/// Schedules `call` to run before or after node updates.
	///
	/// Calls are deduplicated by identity of the [`Rc`](`std::rc::Rc`).
	pub fn schedule_call(&mut self, call: ScheduledCall<P>, before_update: bool, timing: SchedulingType) {
		self.scheduler.add_call(call, before_update);
		if self.scheduler.request_tick(timing) {
			self.perform_tick()
		}
	}

	/// Removes `call` from wherever it is scheduled. Returns whether it was.
	pub fn unschedule_call(&mut self, call: &ScheduledCall<P>, before_update: bool) -> bool {
		self.scheduler.remove_call(call, before_update)
	}

	#[must_use]
	pub fn is_update_requested(&self, id: NodeId) -> bool {
		self.scheduler.pending(id).map_or(false, |pending| pending.full)
	}

	#[must_use]
	pub fn is_partial_update_requested(&self, id: NodeId) -> bool {
		self.scheduler.pending(id).map_or(false, |pending| pending.partial)
	}

	#[must_use]
	pub fn scheduler(&self) -> &Scheduler<P> {
		&self.scheduler
	}

	/// The number of ticks that processed node updates so far.
	#[must_use]
	pub fn tick(&self) -> u64 {
		self.scheduler.tick()
	}

	#[must_use]
	pub fn scheduler_state(&self) -> SchedulerState {
		self.scheduler.state()
	}

	/// Whether a tick would currently do anything.
	#[must_use]
	pub fn has_pending_work(&self) -> bool {
		self.scheduler.has_work()
	}
}
