//! Tick Engine: batches update requests and processes them in phases.
//!
//! A tick runs before-update callbacks, then updates all pending nodes shallowest first, then runs after-update callbacks.
//! While a tick (or any other tree operation) is in progress, new requests are only recorded.
//! They are picked up by the next tick, which is scheduled once the current batch is done.

use crate::{
	children::ChildrenUpdateRequest,
	error::AppError,
	node::{Context, NodeId, RenderFailure, Suspension},
	platform::Platform,
	tree::Tree,
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	mem,
};
use hashbrown::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{error, info, instrument, trace, trace_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
	Idle,
	BeforeUpdate,
	Update,
	AfterUpdate,
}

/// When a requested tick should run. Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchedulingType {
	/// Before the next frame is painted. Repeated requests coalesce.
	AnimationFrame,
	/// As soon as the current task yields.
	Microtask,
	/// Right away, before the requesting call returns.
	///
	/// Any tick already scheduled with the driver is cancelled, since this one covers its work.
	Sync,
}
impl Default for SchedulingType {
	fn default() -> Self {
		Self::AnimationFrame
	}
}

/// Connects a [`Tree`] to the host's event loop.
///
/// Implementations arrange for [`Tree::perform_tick`] to be called at the requested time.
/// They are only ever asked for [`SchedulingType::AnimationFrame`] and [`SchedulingType::Microtask`] ticks,
/// and only while none is scheduled or to replace a less urgent one (after [`cancel`](`TickDriver::cancel`)).
pub trait TickDriver {
	fn schedule(&mut self, timing: SchedulingType);
	fn cancel(&mut self);

	/// A callback that gets a tick scheduled from outside the tree, used to resume after [`Suspension::resolve`].
	fn waker(&self) -> Option<Rc<dyn Fn()>> {
		None
	}
}

/// A [`TickDriver`] that doesn't drive anything: The host calls [`Tree::perform_tick`] itself,
/// for example after checking [`Tree::has_pending_work`] or [`Scheduler::scheduled`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualDriver;
impl TickDriver for ManualDriver {
	fn schedule(&mut self, timing: SchedulingType) {
		trace!("Tick requested: {:?}", timing);
	}

	fn cancel(&mut self) {}
}

/// A callback run before or after node updates.
///
/// Identity is that of the [`Rc`], so scheduling a clone of an already scheduled call does nothing.
pub type ScheduledCall<P> = Rc<dyn Fn(&mut Tree<P>) -> Result<(), AppError>>;

fn call_address<P: Platform>(call: &ScheduledCall<P>) -> *const () {
	Rc::as_ptr(call).cast::<()>()
}

/// Scheduled calls in scheduling order, deduplicated by address.
struct CallbackSet<P: Platform> {
	calls: Vec<ScheduledCall<P>>,
	addresses: HashSet<*const ()>,
}
impl<P: Platform> CallbackSet<P> {
	fn new() -> Self {
		Self {
			calls: Vec::new(),
			addresses: HashSet::new(),
		}
	}

	fn insert(&mut self, call: ScheduledCall<P>) -> bool {
		if !self.addresses.insert(call_address(&call)) {
			return false;
		}
		self.calls.push(call);
		true
	}

	fn remove(&mut self, call: &ScheduledCall<P>) -> bool {
		let address = call_address(call);
		if !self.addresses.remove(&address) {
			return false;
		}
		self.calls.retain(|existing| call_address(existing) != address);
		true
	}

	fn take(&mut self) -> Vec<ScheduledCall<P>> {
		self.addresses.clear();
		mem::take(&mut self.calls)
	}

	/// Removes and returns the calls whose address isn't in `keep`, in order.
	fn take_except(&mut self, keep: &HashSet<*const ()>) -> Vec<ScheduledCall<P>> {
		let (kept, taken): (Vec<_>, Vec<_>) = mem::take(&mut self.calls).into_iter().partition(|call| keep.contains(&call_address(call)));
		self.calls = kept;
		for call in &taken {
			self.addresses.remove(&call_address(call));
		}
		taken
	}

	fn len(&self) -> usize {
		self.calls.len()
	}

	fn is_empty(&self) -> bool {
		self.calls.is_empty()
	}
}

/// What is pending for one node.
pub(crate) struct PendingUpdate<P: Platform> {
	pub(crate) full: bool,
	pub(crate) partial: bool,
	/// Replaces the re-render of a full update.
	pub(crate) children: Option<ChildrenUpdateRequest<P>>,
}
impl<P: Platform> Default for PendingUpdate<P> {
	fn default() -> Self {
		Self {
			full: false,
			partial: false,
			children: None,
		}
	}
}

/// The scheduling state of one [`Tree`].
pub struct Scheduler<P: Platform> {
	state: SchedulerState,
	tick: u64,
	pending: HashMap<NodeId, PendingUpdate<P>>,
	before_update: CallbackSet<P>,
	after_update: CallbackSet<P>,
	/// What the driver was last asked for.
	scheduled: Option<SchedulingType>,
	/// The most urgent timing requested while busy.
	deferred: Option<SchedulingType>,
	/// Suspensions along with the error boundary to update once they resolve.
	suspended: Vec<(Suspension, NodeId)>,
	driver: Box<dyn TickDriver>,
}
impl<P: Platform> Debug for Scheduler<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler")
			.field("state", &self.state)
			.field("tick", &self.tick)
			.field("pending", &self.pending.len())
			.field("before_update", &self.before_update.len())
			.field("after_update", &self.after_update.len())
			.field("scheduled", &self.scheduled)
			.field("deferred", &self.deferred)
			.field("suspended", &self.suspended)
			.finish()
	}
}

impl<P: Platform> Scheduler<P> {
	pub(crate) fn new(driver: Box<dyn TickDriver>) -> Self {
		Self {
			state: SchedulerState::Idle,
			tick: 0,
			pending: HashMap::new(),
			before_update: CallbackSet::new(),
			after_update: CallbackSet::new(),
			scheduled: None,
			deferred: None,
			suspended: Vec::new(),
			driver,
		}
	}

	#[must_use]
	pub fn state(&self) -> SchedulerState {
		self.state
	}

	pub(crate) fn set_state(&mut self, state: SchedulerState) {
		self.state = state
	}

	/// The number of ticks that processed node updates so far.
	#[must_use]
	pub fn tick(&self) -> u64 {
		self.tick
	}

	/// The timing of the tick currently scheduled with the driver, if any.
	#[must_use]
	pub fn scheduled(&self) -> Option<SchedulingType> {
		self.scheduled
	}

	/// The number of nodes with pending updates.
	#[must_use]
	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub(crate) fn pending(&self, id: NodeId) -> Option<&PendingUpdate<P>> {
		self.pending.get(&id)
	}

	pub(crate) fn enqueue_full(&mut self, id: NodeId, children: Option<ChildrenUpdateRequest<P>>) {
		let pending = self.pending.entry(id).or_default();
		pending.full = true;
		pending.children = children;
	}

	pub(crate) fn enqueue_partial(&mut self, id: NodeId) {
		self.pending.entry(id).or_default().partial = true;
	}

	pub(crate) fn add_call(&mut self, call: ScheduledCall<P>, before_update: bool) {
		let added = if before_update { self.before_update.insert(call) } else { self.after_update.insert(call) };
		if !added {
			trace!("Call already scheduled.");
		}
	}

	pub(crate) fn remove_call(&mut self, call: &ScheduledCall<P>, before_update: bool) -> bool {
		if before_update {
			self.before_update.remove(call)
		} else {
			self.after_update.remove(call)
		}
	}

	/// Drops everything pending for `id`, which is being unmounted.
	pub(crate) fn forget(&mut self, id: NodeId) {
		self.pending.remove(&id);
		self.suspended.retain(|&(_, boundary)| boundary != id);
	}

	pub(crate) fn park(&mut self, suspension: Suspension, boundary: NodeId) {
		if self.suspended.iter().any(|(parked, parked_boundary)| parked.ptr_eq(&suspension) && *parked_boundary == boundary) {
			return;
		}
		suspension.set_waker(self.driver.waker());
		self.suspended.push((suspension, boundary));
	}

	fn take_resolved(&mut self) -> Vec<NodeId> {
		let (resolved, waiting) = mem::take(&mut self.suspended).into_iter().partition::<Vec<_>, _>(|(suspension, _)| suspension.is_resolved());
		self.suspended = waiting;
		resolved.into_iter().map(|(_, boundary)| boundary).collect()
	}

	#[must_use]
	pub fn has_work(&self) -> bool {
		!self.pending.is_empty() || !self.before_update.is_empty() || !self.after_update.is_empty() || self.suspended.iter().any(|(suspension, _)| suspension.is_resolved())
	}

	/// Arranges for a tick with the given urgency.
	///
	/// Returns `true` iff the caller must run a tick right away.
	pub(crate) fn request_tick(&mut self, timing: SchedulingType) -> bool {
		if self.state != SchedulerState::Idle {
			self.deferred = self.deferred.max(Some(timing));
			return false;
		}

		match timing {
			SchedulingType::Sync => {
				if self.scheduled.take().is_some() {
					self.driver.cancel()
				}
				true
			}
			timing => {
				if self.scheduled.map_or(true, |scheduled| timing > scheduled) {
					if self.scheduled.is_some() {
						self.driver.cancel()
					}
					self.driver.schedule(timing);
					self.scheduled = Some(timing);
				}
				false
			}
		}
	}

	/// Consumes whatever the driver had scheduled, since a tick is starting now.
	fn begin_tick(&mut self) {
		if self.scheduled.take().is_some() {
			self.driver.cancel()
		}
	}
}

impl<P: Platform> Tree<P> {
	/// Reschedules what was requested during the batch that just ended.
	///
	/// Returns `true` iff a [`SchedulingType::Sync`] tick must run right away.
	pub(crate) fn finish_batch(&mut self) -> bool {
		match self.scheduler.deferred.take() {
			Some(timing) if self.scheduler.has_work() => self.scheduler.request_tick(timing),
			_ => false,
		}
	}

	/// Runs a tick now, followed by any ticks requested synchronously during it.
	///
	/// Does nothing (apart from logging a warning) if called from within a tick.
	#[instrument(skip(self))]
	pub fn perform_tick(&mut self) {
		if self.scheduler.state != SchedulerState::Idle {
			return warn!("Tick requested while {:?}. Ignoring.", self.scheduler.state);
		}
		loop {
			self.run_tick();
			if !self.finish_batch() {
				break;
			}
			trace!("Running synchronously requested tick.");
		}
	}

	fn run_tick(&mut self) {
		self.scheduler.begin_tick();

		for boundary in self.scheduler.take_resolved() {
			if self.is_mounted(boundary) {
				trace!("Suspension resolved. Updating {:?}.", boundary);
				self.scheduler.enqueue_full(boundary, None);
			}
		}

		// Taken before any callback runs. Requests made from here on go to the next tick.
		let batch = self.take_pending();
		let after_update = self.scheduler.after_update.take();

		self.scheduler.state = SchedulerState::BeforeUpdate;
		for call in self.scheduler.before_update.take() {
			if let Err(error) = call(self) {
				error!("Before-update call failed: {}", error);
			}
		}

		self.scheduler.state = SchedulerState::Update;
		if !batch.is_empty() {
			self.scheduler.tick += 1;
			self.update_batch(batch);
		}

		self.scheduler.state = SchedulerState::AfterUpdate;
		self.run_after_update(after_update);

		self.scheduler.state = SchedulerState::Idle;
	}

	/// Runs `calls`, then whatever they schedule in turn, each call at most once.
	///
	/// Calls scheduled during [`SchedulerState::BeforeUpdate`] or [`SchedulerState::Update`] stay scheduled for the next tick,
	/// as do calls that already ran during this phase.
	fn run_after_update(&mut self, mut calls: Vec<ScheduledCall<P>>) {
		let mut skip = self.scheduler.after_update.addresses.clone();
		while !calls.is_empty() {
			for call in calls {
				skip.insert(call_address(&call));
				if let Err(error) = call(self) {
					error!("After-update call failed: {}", error);
				}
			}
			calls = self.scheduler.after_update.take_except(&skip);
		}
	}

	/// Drains the pending map, shallowest nodes first.
	fn take_pending(&mut self) -> Vec<(usize, NodeId, PendingUpdate<P>)> {
		let mut batch: Vec<(usize, NodeId, PendingUpdate<P>)> = self
			.scheduler
			.pending
			.drain()
			.filter_map(|(id, pending)| self.nodes.get(id).map(|slot| (slot.depth, id, pending)))
			.collect();
		batch.sort_by_key(|&(depth, _, _)| depth);
		batch
	}

	fn update_batch(&mut self, batch: Vec<(usize, NodeId, PendingUpdate<P>)>) {
		let tick = self.scheduler.tick;
		info!(tick, nodes = batch.len(), "Updating nodes.");

		for (depth, id, pending) in batch {
			let span = trace_span!("Updating", ?id, depth);
			let _enter = span.enter();

			match self.nodes.get(id) {
				None => {
					trace!("Unmounted meanwhile. Skipping.");
					continue;
				}
				Some(slot) if slot.last_update_tick == tick => {
					trace!("Already updated during this tick. Skipping.");
					continue;
				}
				Some(_) => (),
			}

			if pending.partial {
				self.partial_update(id)
			}
			if pending.full {
				match pending.children {
					Some(request) => {
						if let Err(error) = self.apply_children_request(id, request) {
							error!("Children update request for {:?} failed: {}", id, error);
						}
					}
					None => self.rerender(id),
				}
			}
		}
	}

	fn partial_update(&mut self, id: NodeId) {
		let result = match self.nodes.get_mut(id) {
			Some(slot) => slot.behavior.perform_partial_update(&mut Context {
				node: id,
				own_dn: slot.own_dn.as_ref(),
				platform: &mut self.platform,
				scheduler: &mut self.scheduler,
			}),
			None => return,
		};
		if let Err(error) = result {
			self.report_failure(id, RenderFailure::Error(error))
		}
	}
}

/// Runs a tick on a tree that is shared with its driver, as [`web::shared_tree`](`crate::platform::web::shared_tree`) does.
///
/// If the tree is borrowed (for example because the tick fired while a tree operation was in progress), nothing runs and `retry` is called instead,
/// since the scheduler still considers the tick scheduled and won't ask the driver again on its own.
///
/// Returns whether the tick ran.
pub fn tick_shared<P: Platform>(tree: &RefCell<Tree<P>>, retry: impl FnOnce()) -> bool {
	match tree.try_borrow_mut() {
		Ok(mut tree) => {
			tree.perform_tick();
			true
		}
		Err(_) => {
			warn!("Tree is borrowed. Retrying tick later.");
			retry();
			false
		}
	}
}
