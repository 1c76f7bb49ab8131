//! Children-Update-Request protocol: imperative edits of a node's children that bypass re-rendering it.
//!
//! Each command can be applied right away (see the methods on [`Tree`] below)
//! or deferred to the next tick through [`Tree::request_children_update`].

use crate::{
	disp::{Disposition, SubDisp, UpdateStrategy},
	error::ChildrenError,
	node::{Content, NodeId},
	platform::Platform,
	tree::Tree,
};
use core::{
	fmt::{self, Debug, Formatter},
	ops::Range,
};
use hashbrown::HashSet;
use tracing::{error, instrument, trace, warn};

/// One edit of a node's children.
///
/// Ranges are half-open and refer to the children as they are when the command is applied.
pub enum ChildrenUpdateRequest<P: Platform> {
	/// Replaces `start..end` with `content`.
	///
	/// With `update`, old children are matched and updated as if re-rendered (using `strategy` or else the node's own).
	/// Otherwise all old children in range that aren't [`Content::Retain`]ed are unmounted and all new ones mounted.
	Set {
		start: usize,
		end: usize,
		content: Vec<Content<P>>,
		update: bool,
		strategy: Option<UpdateStrategy>,
	},
	/// Removes `delete_count` children at `start` and mounts `insert` in their place.
	Splice { start: usize, delete_count: usize, insert: Vec<Content<P>> },
	/// Shifts `count` children at `start` by `shift` positions.
	Move { start: usize, count: usize, shift: isize },
	/// Exchanges two non-intersecting ranges, which may differ in length.
	Swap { index1: usize, count1: usize, index2: usize, count2: usize },
	/// Keeps only `start..end`.
	Slice { start: usize, end: usize },
	/// Removes children from both ends.
	Trim { start_count: usize, end_count: usize },
	/// Mounts new children at both ends.
	Grow { prepend: Vec<Content<P>>, append: Vec<Content<P>> },
	/// Reverses the order of `start..end`.
	Reverse { start: usize, end: usize },
}
impl<P: Platform> Debug for ChildrenUpdateRequest<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Set { start, end, content, update, strategy } => f
				.debug_struct("Set")
				.field("start", start)
				.field("end", end)
				.field("content", &content.len())
				.field("update", update)
				.field("strategy", strategy)
				.finish(),
			Self::Splice { start, delete_count, insert } => f.debug_struct("Splice").field("start", start).field("delete_count", delete_count).field("insert", &insert.len()).finish(),
			Self::Move { start, count, shift } => f.debug_struct("Move").field("start", start).field("count", count).field("shift", shift).finish(),
			Self::Swap { index1, count1, index2, count2 } => f.debug_struct("Swap").field("index1", index1).field("count1", count1).field("index2", index2).field("count2", count2).finish(),
			Self::Slice { start, end } => f.debug_struct("Slice").field("start", start).field("end", end).finish(),
			Self::Trim { start_count, end_count } => f.debug_struct("Trim").field("start_count", start_count).field("end_count", end_count).finish(),
			Self::Grow { prepend, append } => f.debug_struct("Grow").field("prepend", &prepend.len()).field("append", &append.len()).finish(),
			Self::Reverse { start, end } => f.debug_struct("Reverse").field("start", start).field("end", end).finish(),
		}
	}
}

/// Rejects `error` in debug builds. Release builds log it and carry on with `fallback`.
fn reject<T>(error: ChildrenError, fallback: T) -> Result<T, ChildrenError> {
	if cfg!(debug_assertions) {
		Err(error)
	} else {
		warn!("{}. Continuing with the nearest valid request.", error);
		Ok(fallback)
	}
}

fn check_range(start: usize, end: usize, len: usize) -> Result<Range<usize>, ChildrenError> {
	if start <= end && end <= len {
		return Ok(start..end);
	}
	let clamped_end = end.min(len);
	reject(ChildrenError::OutOfBounds { start, end, len }, start.min(clamped_end)..clamped_end)
}

impl<P: Platform> Tree<P> {
	/// Applies `request` to `id`'s children right away.
	///
	/// # Errors
	///
	/// Iff `id` isn't mounted or, in debug builds, the request's ranges are invalid.
	#[instrument(skip(self))]
	pub fn update_children(&mut self, id: NodeId, request: ChildrenUpdateRequest<P>) -> Result<(), ChildrenError> {
		self.run_update(|tree| tree.apply_children_request(id, request))
	}

	/// See [`ChildrenUpdateRequest::Set`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn set_children(&mut self, id: NodeId, start: usize, end: usize, content: Vec<Content<P>>, update: bool, strategy: Option<UpdateStrategy>) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Set { start, end, content, update, strategy })
	}

	/// See [`ChildrenUpdateRequest::Splice`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn splice_children(&mut self, id: NodeId, start: usize, delete_count: usize, insert: Vec<Content<P>>) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Splice { start, delete_count, insert })
	}

	/// See [`ChildrenUpdateRequest::Move`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn move_children(&mut self, id: NodeId, start: usize, count: usize, shift: isize) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Move { start, count, shift })
	}

	/// See [`ChildrenUpdateRequest::Swap`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn swap_children(&mut self, id: NodeId, index1: usize, count1: usize, index2: usize, count2: usize) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Swap { index1, count1, index2, count2 })
	}

	/// See [`ChildrenUpdateRequest::Slice`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn slice_children(&mut self, id: NodeId, start: usize, end: usize) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Slice { start, end })
	}

	/// See [`ChildrenUpdateRequest::Trim`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn trim_children(&mut self, id: NodeId, start_count: usize, end_count: usize) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Trim { start_count, end_count })
	}

	/// See [`ChildrenUpdateRequest::Grow`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn grow_children(&mut self, id: NodeId, prepend: Vec<Content<P>>, append: Vec<Content<P>>) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Grow { prepend, append })
	}

	/// See [`ChildrenUpdateRequest::Reverse`].
	///
	/// # Errors
	///
	/// See [`Tree::update_children`].
	pub fn reverse_children(&mut self, id: NodeId, start: usize, end: usize) -> Result<(), ChildrenError> {
		self.update_children(id, ChildrenUpdateRequest::Reverse { start, end })
	}

	pub(crate) fn apply_children_request(&mut self, id: NodeId, request: ChildrenUpdateRequest<P>) -> Result<(), ChildrenError> {
		if !self.is_mounted(id) {
			return Err(ChildrenError::NotMounted(id));
		}
		let len = self.children(id).len();

		match request {
			ChildrenUpdateRequest::Set { start, end, content, update, strategy } => {
				let range = check_range(start, end, len)?;
				if update {
					let strategy = strategy.unwrap_or_else(|| self.effective_update_strategy(id));
					self.reconcile_range(id, range, content, strategy)
				} else {
					self.replace_range(id, range, content)
				}
			}
			ChildrenUpdateRequest::Splice { start, delete_count, insert } => {
				let range = check_range(start, start.saturating_add(delete_count), len)?;
				self.replace_range(id, range, insert)
			}
			ChildrenUpdateRequest::Move { start, count, shift } => {
				let range = check_range(start, start.saturating_add(count), len)?;
				let room = if shift < 0 { range.start } else { len - range.end };
				let distance = match shift.unsigned_abs() {
					distance if distance > room => reject(ChildrenError::InvalidShift { start, count, shift, len }, room)?,
					distance => distance,
				};
				if shift < 0 {
					self.swap_ranges(id, range.start - distance, distance, range.start, range.len())
				} else {
					self.swap_ranges(id, range.start, range.len(), range.end, distance)
				}
			}
			ChildrenUpdateRequest::Swap { index1, count1, index2, count2 } => {
				let first = check_range(index1, index1.saturating_add(count1), len)?;
				let second = check_range(index2, index2.saturating_add(count2), len)?;
				let (first, second) = if first.start <= second.start { (first, second) } else { (second, first) };
				if first.end > second.start {
					return reject(ChildrenError::Intersecting { first, second }, ());
				}
				self.swap_ranges(id, first.start, first.len(), second.start, second.len())
			}
			ChildrenUpdateRequest::Slice { start, end } => {
				let range = check_range(start, end, len)?;
				self.slice_range(id, range)
			}
			ChildrenUpdateRequest::Trim { start_count, end_count } => {
				let range = check_range(start_count, len.saturating_sub(end_count), len)?;
				self.slice_range(id, range)
			}
			ChildrenUpdateRequest::Grow { prepend, append } => self.grow(id, prepend, append),
			ChildrenUpdateRequest::Reverse { start, end } => {
				let range = check_range(start, end, len)?;
				self.reverse_range(id, range)
			}
		}

		if let Some(slot) = self.nodes.get_mut(id) {
			slot.last_update_tick = self.scheduler.tick();
		}
		Ok(())
	}

	/// The platform node `id`'s children are inserted into.
	fn children_anchor(&self, id: NodeId) -> Option<P::Handle> {
		self.children_region(id).map(|(anchor, _)| anchor)
	}

	fn reconcile_range(&mut self, id: NodeId, range: Range<usize>, content: Vec<Content<P>>, strategy: UpdateStrategy) {
		let anchor = match self.children_anchor(id) {
			Some(anchor) => anchor,
			None => return,
		};
		let before = self.dn_before_child(id, range.end);
		self.reconcile_children(id, range, content, strategy, &anchor, before)
	}

	/// Unmounts `range` and mounts `content` in its place, except for retained nodes.
	fn replace_range(&mut self, id: NodeId, range: Range<usize>, content: Vec<Content<P>>) {
		let anchor = match self.children_anchor(id) {
			Some(anchor) => anchor,
			None => return,
		};
		let before = self.dn_before_child(id, range.end);
		let old_length = self.children(id).len();
		let old = self.children(id)[range.clone()].to_vec();

		let mut retained = HashSet::new();
		let mut sub_disps = Vec::with_capacity(content.len());
		for content in content {
			match content {
				Content::Node(new) => sub_disps.push(SubDisp::Insert { new }),
				Content::Retain(retain) => match old.iter().position(|&old| old == retain) {
					Some(position) if retained.insert(retain) => sub_disps.push(SubDisp::NoChange {
						old: retain,
						old_index: range.start + position,
					}),
					_ => error!("Can't retain {:?}: It's not in range {:?}, or retained twice. Skipping it.", retain, range),
				},
			}
		}

		let disp = Disposition {
			old_start_index: range.start,
			old_end_index: range.end,
			old_length,
			replace_all: retained.is_empty(),
			to_remove: old.into_iter().filter(|old| !retained.contains(old)).collect(),
			sub_disps,
			sub_groups: None,
		};
		let new_ids = self.apply_disposition(id, disp, &anchor, before);
		self.replace_children(id, range, new_ids)
	}

	/// Exchanges `index1..index1 + count1` with `index2..index2 + count2`, which must be ordered and disjoint.
	///
	/// Of the two ranges and the children between them, only the two smaller parts are moved on the platform.
	fn swap_ranges(&mut self, id: NodeId, index1: usize, count1: usize, index2: usize, count2: usize) {
		let anchor = match self.children_anchor(id) {
			Some(anchor) => anchor,
			None => return,
		};
		let end = index2 + count2;
		let children = self.children(id).to_vec();
		let (a, m, b) = (&children[index1..index1 + count1], &children[index1 + count1..index2], &children[index2..end]);
		let rest = self.dn_before_child(id, end);

		if m.len() >= a.len() && m.len() >= b.len() {
			trace!(a = a.len(), b = b.len(), "Moving both ranges.");
			self.move_before(a, &anchor, rest.as_ref());
			let target = self.range_first_dn(m).or_else(|| self.range_first_dn(a)).or(rest);
			self.move_before(b, &anchor, target.as_ref());
		} else if b.len() >= a.len() {
			trace!(a = a.len(), m = m.len(), "Moving the first range and the middle.");
			self.move_before(a, &anchor, rest.as_ref());
			let target = self.range_first_dn(a).or(rest);
			self.move_before(m, &anchor, target.as_ref());
		} else {
			trace!(m = m.len(), b = b.len(), "Moving the second range and the middle.");
			let target = self.range_first_dn(a).or_else(|| self.range_first_dn(m)).or_else(|| rest.clone());
			self.move_before(b, &anchor, target.as_ref());
			let target = self.range_first_dn(a).or(rest);
			self.move_before(m, &anchor, target.as_ref());
		}

		let swapped = b.iter().chain(m).chain(a).copied().collect();
		self.replace_children(id, index1..end, swapped)
	}

	fn slice_range(&mut self, id: NodeId, range: Range<usize>) {
		let children = self.children(id).to_vec();
		for &child in children[..range.start].iter().chain(&children[range.end..]) {
			self.unmount_node(child, true)
		}
		self.replace_children(id, 0..children.len(), children[range].to_vec())
	}

	fn grow(&mut self, id: NodeId, prepend: Vec<Content<P>>, append: Vec<Content<P>>) {
		let anchor = match self.children_anchor(id) {
			Some(anchor) => anchor,
			None => return,
		};

		let len = self.children(id).len();
		let before = self.dn_before_child(id, len);
		let appended = self.mount_contents(id, len, append, &anchor, before.as_ref());
		self.replace_children(id, len..len, appended);

		let before = self.dn_before_child(id, 0);
		let prepended = self.mount_contents(id, 0, prepend, &anchor, before.as_ref());
		self.replace_children(id, 0..0, prepended)
	}

	fn mount_contents(&mut self, id: NodeId, start: usize, content: Vec<Content<P>>, anchor: &P::Handle, before: Option<&P::Handle>) -> Vec<NodeId> {
		content
			.into_iter()
			.filter_map(|content| match content {
				Content::Node(new) => Some(new),
				Content::Retain(retain) => {
					error!("Can't retain {:?} while growing: It would be in two places at once. Skipping it.", retain);
					None
				}
			})
			.enumerate()
			.map(|(i, new)| self.mount_node(Some(id), start + i, new, anchor.clone(), before))
			.collect()
	}

	/// Physically reinserts the children of `range` in reverse order in front of the first one, then reverses them logically.
	fn reverse_range(&mut self, id: NodeId, range: Range<usize>) {
		let anchor = match self.children_anchor(id) {
			Some(anchor) => anchor,
			None => return,
		};
		let children = self.children(id)[range.clone()].to_vec();

		if let Some((pivot, pivot_dn)) = children.iter().enumerate().find_map(|(i, &child)| self.first_dn(child).map(|dn| (i, dn))) {
			for &child in children[pivot + 1..].iter().rev() {
				self.move_before(&[child], &anchor, Some(&pivot_dn))
			}
		}

		self.replace_children(id, range, children.into_iter().rev().collect())
	}
}
