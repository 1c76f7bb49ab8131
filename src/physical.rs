//! Physical Updater: applies a [`Disposition`] to the platform tree.
//!
//! Both strategies walk the new children from the end to the start, keeping track of the platform node
//! the current child's content must end up right before. Everything after that point is final,
//! so each node (or group) only has to be moved if it isn't already in front of it.

use crate::{
	disp::{Disposition, SubDisp, VnAction},
	group::DispGroup,
	node::NodeId,
	platform::Platform,
	tree::Tree,
};
use tracing::{error, trace, trace_span};

impl<P: Platform> Tree<P> {
	/// Applies `disp` to `parent`'s children and returns the new children for the reconciled range, in order.
	///
	/// The caller is responsible for splicing the result into `parent`'s child list.
	/// `before` is the platform node that the range's content ends up in front of.
	pub(crate) fn apply_disposition(&mut self, parent: NodeId, disp: Disposition<P>, anchor: &P::Handle, before: Option<P::Handle>) -> Vec<NodeId> {
		let span = trace_span!("Applying disposition", ?parent, replace_all = disp.replace_all, removals = disp.to_remove.len(), children = disp.sub_disps.len());
		let _enter = span.enter();

		for old in disp.to_remove {
			self.unmount_node(old, true)
		}

		let start = disp.old_start_index;
		match disp.sub_groups {
			Some(groups) if !disp.replace_all => {
				trace!("Updating by {} groups.", groups.len());
				self.update_by_groups(parent, start, disp.sub_disps, groups, anchor, before)
			}
			_ => self.update_by_nodes(parent, start, disp.sub_disps, anchor, before),
		}
	}

	fn update_by_nodes(&mut self, parent: NodeId, start: usize, sub_disps: Vec<SubDisp<P>>, anchor: &P::Handle, mut before: Option<P::Handle>) -> Vec<NodeId> {
		let mut new_ids = vec![NodeId::default(); sub_disps.len()];
		for (i, sub_disp) in sub_disps.into_iter().enumerate().rev() {
			let id = self.apply_sub_disp(parent, start + i, sub_disp, anchor, before.clone(), true);
			if let Some(first_dn) = self.first_dn(id) {
				before = Some(first_dn)
			}
			new_ids[i] = id;
		}
		new_ids
	}

	fn update_by_groups(&mut self, parent: NodeId, start: usize, sub_disps: Vec<SubDisp<P>>, mut groups: Vec<DispGroup<P::Handle>>, anchor: &P::Handle, mut before: Option<P::Handle>) -> Vec<NodeId> {
		let old_ids: Vec<Option<NodeId>> = sub_disps.iter().map(SubDisp::old).collect();
		let mut sub_disps: Vec<Option<SubDisp<P>>> = sub_disps.into_iter().map(Some).collect();
		let mut new_ids = vec![NodeId::default(); sub_disps.len()];

		for g in (0..groups.len()).rev() {
			let (action, first, last) = (groups[g].action, groups[g].first, groups[g].last);

			if action != VnAction::Insert {
				let members: Vec<NodeId> = old_ids[first..=last].iter().flatten().copied().collect();
				let predecessor = g.checked_sub(1).map(|p| &groups[p]).filter(|p| p.action != VnAction::Insert && p.count() < members.len());
				let predecessor: Option<Vec<NodeId>> = predecessor.map(|p| old_ids[p.first..=p.last].iter().flatten().copied().collect());
				self.place_group(&members, predecessor.as_deref(), anchor, before.as_ref());
			}

			// Members are in place now (or mounted in place right here), so updates can't disturb the order.
			for i in (first..=last).rev() {
				let id = match sub_disps[i].take() {
					Some(sub_disp) => self.apply_sub_disp(parent, start + i, sub_disp, anchor, before.clone(), false),
					None => continue,
				};
				if let Some(first_dn) = self.first_dn(id) {
					before = Some(first_dn)
				}
				new_ids[i] = id;
			}

			let group = &mut groups[g];
			group.first_dn = self.range_first_dn(&new_ids[first..=last]);
			group.last_dn = self.range_last_dn(&new_ids[first..=last]);
		}
		new_ids
	}

	/// Mounts, updates or keeps one child, placing existing ones in front of `before` if `place` is set.
	fn apply_sub_disp(&mut self, parent: NodeId, index: usize, sub_disp: SubDisp<P>, anchor: &P::Handle, before: Option<P::Handle>, place: bool) -> NodeId {
		match sub_disp {
			SubDisp::Insert { new } => self.mount_node(Some(parent), index, new, anchor.clone(), before.as_ref()),
			SubDisp::Update { old, new, .. } => {
				if place {
					self.place_before(old, anchor, before.as_ref());
				}
				self.update_node(old, new, before);
				old
			}
			SubDisp::NoChange { old, .. } => {
				if place {
					self.place_before(old, anchor, before.as_ref());
				}
				old
			}
		}
	}

	/// Moves `id`'s content in front of `before`, unless it's already there.
	fn place_before(&mut self, id: NodeId, anchor: &P::Handle, before: Option<&P::Handle>) {
		let last_dn = match self.last_dn(id) {
			Some(last_dn) => last_dn,
			None => return,
		};
		if self.platform.next_sibling(&last_dn).as_ref() == before {
			return;
		}
		self.move_before(&[id], anchor, before)
	}

	/// Moves the adjacent `members`' content as one block in front of `before`, unless it's already there.
	///
	/// If `predecessor` (the preceding group) is smaller and the two blocks are exactly transposed, it is moved instead.
	fn place_group(&mut self, members: &[NodeId], predecessor: Option<&[NodeId]>, anchor: &P::Handle, before: Option<&P::Handle>) {
		let (first_dn, last_dn) = match (self.range_first_dn(members), self.range_last_dn(members)) {
			(Some(first_dn), Some(last_dn)) => (first_dn, last_dn),
			_ => return,
		};
		if self.platform.next_sibling(&last_dn).as_ref() == before {
			return;
		}

		if let Some(predecessor) = predecessor {
			if let (Some(predecessor_first), Some(predecessor_last)) = (self.range_first_dn(predecessor), self.range_last_dn(predecessor)) {
				let transposed = self.platform.next_sibling(&predecessor_last).as_ref() == before && self.platform.next_sibling(&last_dn) == Some(predecessor_first);
				if transposed {
					trace!("Moving the smaller preceding group instead.");
					return self.move_before(predecessor, anchor, Some(&first_dn));
				}
			}
		}

		self.move_before(members, anchor, before)
	}

	/// Moves the content of `ids`, in order, in front of `before`.
	pub(crate) fn move_before(&mut self, ids: &[NodeId], anchor: &P::Handle, before: Option<&P::Handle>) {
		for &id in ids {
			for dn in self.immediate_dns(id) {
				if let Err(error) = self.platform.insert_before(anchor, &dn, before) {
					error!("Failed to move platform node of {:?}: {:?}", id, error);
				}
			}
		}
	}

	pub(crate) fn range_first_dn(&self, ids: &[NodeId]) -> Option<P::Handle> {
		ids.iter().find_map(|&id| self.first_dn(id))
	}

	pub(crate) fn range_last_dn(&self, ids: &[NodeId]) -> Option<P::Handle> {
		ids.iter().rev().find_map(|&id| self.last_dn(id))
	}
}
