//! Group Builder: collapses dispositions into maximal runs that can be moved as one block.

use crate::{
	disp::{SubDisp, VnAction},
	platform::Platform,
};

/// A maximal contiguous run of same-action [`SubDisp`]s.
///
/// Runs of existing nodes are additionally contiguous in the *old* order, so their platform nodes are adjacent and can be moved as a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispGroup<H> {
	pub action: VnAction,
	/// Index of the first member in the owning [`Disposition::sub_disps`](`crate::disp::Disposition::sub_disps`).
	pub first: usize,
	/// Index of the last member, inclusive.
	pub last: usize,
	/// Known only once the group was physically updated.
	pub first_dn: Option<H>,
	/// Known only once the group was physically updated.
	pub last_dn: Option<H>,
}
impl<H> DispGroup<H> {
	fn new(action: VnAction, first: usize) -> Self {
		Self {
			action,
			first,
			last: first,
			first_dn: None,
			last_dn: None,
		}
	}

	#[must_use]
	pub fn count(&self) -> usize {
		self.last - self.first + 1
	}
}

/// Splits `sub_disps` into [`DispGroup`]s that together cover every index exactly once.
///
/// Inserted nodes merge unconditionally.
/// Existing nodes only extend a group if they directly followed the previous member in the old order,
/// since otherwise the group's platform nodes wouldn't be adjacent.
#[must_use]
pub fn build_groups<P: Platform>(sub_disps: &[SubDisp<P>]) -> Vec<DispGroup<P::Handle>> {
	let mut groups = Vec::new();
	let mut current: Option<DispGroup<P::Handle>> = None;
	let mut previous_old_index = None;

	for (i, sub_disp) in sub_disps.iter().enumerate() {
		let action = sub_disp.action();
		let old_index = sub_disp.old_index();
		let extends = current.as_ref().map_or(false, |group| {
			group.action == action
				&& match (previous_old_index, old_index) {
					(_, None) => true,
					(Some(previous), Some(old_index)) => old_index == previous + 1,
					(None, Some(_)) => false,
				}
		});

		match &mut current {
			Some(group) if extends => group.last = i,
			_ => groups.extend(current.replace(DispGroup::new(action, i))),
		}
		previous_old_index = old_index;
	}

	groups.extend(current);
	groups
}
