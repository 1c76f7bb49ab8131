//! Disposition Builder: pairs a node's previous children with freshly rendered ones.
//!
//! The result says, per new child, whether it is inserted, updates an old node, or simply keeps an old node,
//! and lists the old nodes that have no counterpart anymore. Nothing is mutated here;
//! see [`Tree`](`crate::tree::Tree`) for how a [`Disposition`] is applied.

use crate::{
	group::{build_groups, DispGroup},
	node::{kind_of, Content, Key, NodeId, VirtualNode},
	platform::Platform,
	tree::Tree,
};
use core::ops::Range;
use hashbrown::{hash_map::Entry, HashMap, HashSet};
use tracing::{error, instrument, trace, warn};

/// Up to this many new children, [`DispGroup`]s aren't worth their overhead.
pub const GROUP_THRESHOLD: usize = 8;

/// How old and new children are matched.
///
/// The default matches by key first and recycles keyed nodes whose key disappeared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UpdateStrategy {
	/// Match all children positionally, ignoring keys entirely.
	///
	/// Only correct if the caller guarantees that child order is stable.
	pub ignore_keys: bool,
	/// Never reuse an old keyed node for a new node with a different key.
	pub disable_keyed_node_recycling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VnAction {
	Insert,
	Update,
	NoChange,
}

/// The disposition of one new child.
pub enum SubDisp<P: Platform> {
	Insert {
		new: Box<dyn VirtualNode<P>>,
	},
	Update {
		old: NodeId,
		/// `old`'s index among the old children.
		old_index: usize,
		new: Box<dyn VirtualNode<P>>,
	},
	NoChange {
		old: NodeId,
		old_index: usize,
	},
}
impl<P: Platform> SubDisp<P> {
	#[must_use]
	pub fn action(&self) -> VnAction {
		match self {
			SubDisp::Insert { .. } => VnAction::Insert,
			SubDisp::Update { .. } => VnAction::Update,
			SubDisp::NoChange { .. } => VnAction::NoChange,
		}
	}

	#[must_use]
	pub fn old(&self) -> Option<NodeId> {
		match *self {
			SubDisp::Insert { .. } => None,
			SubDisp::Update { old, .. } | SubDisp::NoChange { old, .. } => Some(old),
		}
	}

	#[must_use]
	pub fn old_index(&self) -> Option<usize> {
		match *self {
			SubDisp::Insert { .. } => None,
			SubDisp::Update { old_index, .. } | SubDisp::NoChange { old_index, .. } => Some(old_index),
		}
	}

	#[must_use]
	pub fn new_node(&self) -> Option<&dyn VirtualNode<P>> {
		match self {
			SubDisp::Insert { new } | SubDisp::Update { new, .. } => Some(new.as_ref()),
			SubDisp::NoChange { .. } => None,
		}
	}
}
impl<P: Platform> core::fmt::Debug for SubDisp<P> {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			SubDisp::Insert { new } => f.debug_struct("Insert").field("new", &new.name()).finish(),
			SubDisp::Update { old, old_index, new } => f.debug_struct("Update").field("old", old).field("old_index", old_index).field("new", &new.name()).finish(),
			SubDisp::NoChange { old, old_index } => f.debug_struct("NoChange").field("old", old).field("old_index", old_index).finish(),
		}
	}
}

/// The outcome of reconciling (a range of) one node's children.
///
/// Built fresh for each reconciliation and consumed by it.
#[derive(Debug)]
pub struct Disposition<P: Platform> {
	pub old_start_index: usize,
	pub old_end_index: usize,
	/// The total number of old children, including those outside the reconciled range.
	pub old_length: usize,
	/// Not a single new child matched an old one: Unmount everything and mount everything.
	pub replace_all: bool,
	/// Old children without counterpart, in old order.
	pub to_remove: Vec<NodeId>,
	pub sub_disps: Vec<SubDisp<P>>,
	/// Contiguous same-action runs of `sub_disps`, if there are enough of them to be worth it.
	pub sub_groups: Option<Vec<DispGroup<P::Handle>>>,
}
impl<P: Platform> Disposition<P> {
	fn empty(range: &Range<usize>, old_length: usize) -> Self {
		Self {
			old_start_index: range.start,
			old_end_index: range.end,
			old_length,
			replace_all: false,
			to_remove: Vec::new(),
			sub_disps: Vec::new(),
			sub_groups: None,
		}
	}

	/// Iff nothing at all changes.
	#[must_use]
	pub fn is_no_op(&self) -> bool {
		self.to_remove.is_empty() && self.sub_disps.iter().all(|sub_disp| sub_disp.action() == VnAction::NoChange)
	}

	#[must_use]
	pub fn count(&self, action: VnAction) -> usize {
		self.sub_disps.iter().filter(|sub_disp| sub_disp.action() == action).count()
	}
}

/// Whether `old` may absorb `new`.
fn is_compatible<P: Platform>(tree: &Tree<P>, old: NodeId, new: &dyn VirtualNode<P>) -> bool {
	tree.slot(old).map_or(false, |slot| {
		let behavior = slot.behavior.as_ref();
		kind_of(behavior) == kind_of(new) && behavior.is_update_possible(new)
	})
}

/// Matches `new_children` against `old_children[range]`.
///
/// Keyed new nodes are looked up by key among keyed old nodes.
/// Unkeyed new nodes (or all of them, with [`UpdateStrategy::ignore_keys`]) take the next unkeyed old node in order.
/// Unless [`UpdateStrategy::disable_keyed_node_recycling`] is set, new nodes still unmatched after that
/// may take over leftover keyed old nodes of a compatible kind.
///
/// # Panics
///
/// Iff `range` is out of bounds for `old_children`.
#[allow(clippy::too_many_lines)]
#[instrument(skip(tree, old_children, new_children), fields(old_len = old_children.len(), new_len = new_children.len()))]
pub fn build_sub_node_dispositions<P: Platform>(
	tree: &Tree<P>,
	old_children: &[NodeId],
	range: Range<usize>,
	new_children: Vec<Content<P>>,
	strategy: UpdateStrategy,
) -> Disposition<P> {
	let mut disp = Disposition::empty(&range, old_children.len());
	let old_range = &old_children[range.clone()];

	if new_children.is_empty() {
		if !old_range.is_empty() {
			trace!("No new children. Removing all {} old ones.", old_range.len());
			disp.to_remove = old_range.to_vec();
			disp.replace_all = true;
		}
		return disp;
	}

	if old_range.is_empty() {
		trace!("No old children. Inserting all {} new ones.", new_children.len());
		disp.replace_all = true;
		disp.sub_disps = new_children
			.into_iter()
			.filter_map(|content| match content {
				Content::Node(new) => Some(SubDisp::Insert { new }),
				Content::Retain(id) => {
					error!("Can't retain {:?}: There are no old children in range {:?}. Skipping it.", id, range);
					None
				}
			})
			.collect();
		return disp;
	}

	let old_index = |id: NodeId| tree.slot(id).map_or(0, |slot| slot.index);

	if old_range.len() == 1 && new_children.len() == 1 {
		let old = old_range[0];
		let new = new_children.into_iter().next();
		match new {
			Some(Content::Retain(id)) if id == old => {
				disp.sub_disps.push(SubDisp::NoChange { old, old_index: old_index(old) });
			}
			Some(Content::Retain(id)) => {
				error!("Can't retain {:?}: It's not among the old children in range {:?}. Skipping it.", id, range);
				disp.to_remove.push(old);
				disp.replace_all = true;
			}
			Some(Content::Node(new)) => {
				let old_key = tree.slot(old).and_then(|slot| slot.key.as_ref());
				if keys_allow_single(old_key, new.key(), strategy) && is_compatible(tree, old, new.as_ref()) {
					disp.sub_disps.push(SubDisp::Update { old, old_index: old_index(old), new });
				} else {
					disp.to_remove.push(old);
					disp.sub_disps.push(SubDisp::Insert { new });
					disp.replace_all = true;
				}
			}
			None => (),
		}
		return disp;
	}

	// Nodes retained by identity are never up for matching.
	let retained: HashSet<NodeId> = new_children
		.iter()
		.filter_map(|content| match *content {
			Content::Retain(id) => Some(id),
			Content::Node(_) => None,
		})
		.collect();
	let mut retained_unclaimed: HashSet<NodeId> = old_range.iter().copied().filter(|id| retained.contains(id)).collect();

	let mut keyed = HashMap::<Key, NodeId>::new();
	let mut unkeyed = Vec::new();
	for &id in old_range.iter().filter(|id| !retained.contains(id)) {
		match (strategy.ignore_keys, tree.slot(id).and_then(|slot| slot.key.clone())) {
			(false, Some(key)) => match keyed.entry(key) {
				Entry::Vacant(vacant) => {
					vacant.insert(id);
				}
				Entry::Occupied(occupied) => {
					if cfg!(feature = "dangerous-logging") {
						warn!("Duplicate old key {:?}. Treating {:?} as unkeyed.", occupied.key(), id);
					} else {
						warn!("Duplicate old key. Treating {:?} as unkeyed.", id);
					}
					unkeyed.push(id);
				}
			},
			_ => unkeyed.push(id),
		}
	}
	let mut unkeyed = unkeyed.into_iter();

	let mut matched = 0_usize;
	let mut unmatched = Vec::new();
	disp.sub_disps.reserve(new_children.len());
	for content in new_children {
		let new = match content {
			Content::Retain(id) => {
				if retained_unclaimed.remove(&id) {
					disp.sub_disps.push(SubDisp::NoChange { old: id, old_index: old_index(id) });
					matched += 1;
				} else {
					error!("Can't retain {:?}: It's not among the old children in range {:?}, or retained twice. Skipping it.", id, range);
				}
				continue;
			}
			Content::Node(new) => new,
		};

		let candidate = match new.key() {
			Some(key) if !strategy.ignore_keys => keyed.remove(key),
			_ => unkeyed.next(),
		};

		match candidate {
			Some(old) if is_compatible(tree, old, new.as_ref()) => {
				disp.sub_disps.push(SubDisp::Update { old, old_index: old_index(old), new });
				matched += 1;
			}
			Some(old) => {
				trace!("Candidate {:?} can't be updated. Replacing it.", old);
				disp.to_remove.push(old);
				unmatched.push(disp.sub_disps.len());
				disp.sub_disps.push(SubDisp::Insert { new });
			}
			None => {
				unmatched.push(disp.sub_disps.len());
				disp.sub_disps.push(SubDisp::Insert { new });
			}
		}
	}

	// Leftover keyed nodes, in old order.
	let mut leftovers: Vec<NodeId> = if keyed.is_empty() {
		Vec::new()
	} else {
		old_range
			.iter()
			.copied()
			.filter(|&id| {
				tree.slot(id)
					.and_then(|slot| slot.key.as_ref())
					.map_or(false, |key| keyed.get(key) == Some(&id))
			})
			.collect()
	};

	if !strategy.disable_keyed_node_recycling && !strategy.ignore_keys && !unmatched.is_empty() && !leftovers.is_empty() {
		trace!("Trying to recycle {} keyed node(s) for {} unmatched new node(s).", leftovers.len(), unmatched.len());
		for i in unmatched {
			let position = match disp.sub_disps[i].new_node() {
				Some(new) => leftovers.iter().position(|&old| is_compatible(tree, old, new)),
				None => None,
			};
			if let Some(position) = position {
				let old = leftovers.remove(position);
				let sub_disp = &mut disp.sub_disps[i];
				let placeholder = SubDisp::NoChange { old, old_index: 0 };
				if let SubDisp::Insert { new } = core::mem::replace(sub_disp, placeholder) {
					*sub_disp = SubDisp::Update { old, old_index: old_index(old), new };
					matched += 1;
				}
			}
		}
	}

	disp.to_remove.extend(leftovers);
	disp.to_remove.extend(unkeyed);

	if matched == 0 {
		trace!("Nothing matched. Replacing all.");
		disp.replace_all = true;
	} else if disp.sub_disps.len() > GROUP_THRESHOLD {
		disp.sub_groups = Some(build_groups(&disp.sub_disps));
	}

	disp
}

/// Whether the single-child fast path may pair a lone old child with a lone new one.
///
/// This agrees with what the general path would decide for the same input.
fn keys_allow_single(old: Option<&Key>, new: Option<&Key>, strategy: UpdateStrategy) -> bool {
	if strategy.ignore_keys {
		return true;
	}
	match (old, new) {
		(None, None) => true,
		(Some(old), Some(new)) if old == new => true,
		// A keyed old node can only be recycled.
		(Some(_), _) => !strategy.disable_keyed_node_recycling,
		// Keyed new nodes don't take unkeyed old ones.
		(None, Some(_)) => false,
	}
}
