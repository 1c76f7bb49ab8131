//! A headless [`Platform`] that keeps its tree in plain vectors and counts the operations applied to it.
//!
//! This is mainly useful to test reconciliation without a browser, but also works as a cheap render target
//! for anything that only needs to inspect the resulting structure.

use super::Platform;
use crate::error::MemoryError;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryHandle(usize);

/// Counts of structural operations applied through [`Platform`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
	/// Detached nodes that were attached.
	pub inserts: usize,
	/// Already attached nodes that were reattached elsewhere.
	pub moves: usize,
	pub removals: usize,
}

#[derive(Debug)]
struct MemoryNode {
	label: String,
	parent: Option<MemoryHandle>,
	children: Vec<MemoryHandle>,
}

#[derive(Debug, Default)]
pub struct MemoryPlatform {
	nodes: Vec<MemoryNode>,
	stats: OpStats,
}

impl MemoryPlatform {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a new detached node.
	pub fn create(&mut self, label: impl Into<String>) -> MemoryHandle {
		let handle = MemoryHandle(self.nodes.len());
		self.nodes.push(MemoryNode {
			label: label.into(),
			parent: None,
			children: Vec::new(),
		});
		handle
	}

	/// # Panics
	///
	/// Iff `handle` was not created by this instance.
	#[must_use]
	pub fn label(&self, handle: MemoryHandle) -> &str {
		&self.nodes[handle.0].label
	}

	pub fn set_label(&mut self, handle: MemoryHandle, label: impl Into<String>) {
		if let Some(node) = self.nodes.get_mut(handle.0) {
			node.label = label.into();
		}
	}

	#[must_use]
	pub fn children(&self, handle: MemoryHandle) -> &[MemoryHandle] {
		self.nodes.get(handle.0).map_or(&[], |node| &node.children)
	}

	#[must_use]
	pub fn parent(&self, handle: MemoryHandle) -> Option<MemoryHandle> {
		self.nodes.get(handle.0).and_then(|node| node.parent)
	}

	/// Labels of `handle`'s children, in order.
	#[must_use]
	pub fn child_labels(&self, handle: MemoryHandle) -> Vec<&str> {
		self.children(handle).iter().map(|&child| self.label(child)).collect()
	}

	/// A compact rendering of the subtree below `handle` (exclusive), like `a,b(c,d),e`.
	#[must_use]
	pub fn outline(&self, handle: MemoryHandle) -> String {
		self.children(handle)
			.iter()
			.map(|&child| {
				if self.children(child).is_empty() {
					self.label(child).to_owned()
				} else {
					format!("{}({})", self.label(child), self.outline(child))
				}
			})
			.collect::<Vec<_>>()
			.join(",")
	}

	#[must_use]
	pub fn stats(&self) -> OpStats {
		self.stats
	}

	pub fn reset_stats(&mut self) {
		self.stats = OpStats::default()
	}

	fn check(&self, handle: MemoryHandle) -> Result<(), MemoryError> {
		if handle.0 < self.nodes.len() {
			Ok(())
		} else {
			Err(MemoryError::UnknownHandle(handle.0))
		}
	}

	fn detach(&mut self, handle: MemoryHandle) -> bool {
		match self.nodes[handle.0].parent.take() {
			Some(parent) => {
				self.nodes[parent.0].children.retain(|&child| child != handle);
				true
			}
			None => false,
		}
	}

	fn is_ancestor_or_self(&self, ancestor: MemoryHandle, mut node: MemoryHandle) -> bool {
		loop {
			if node == ancestor {
				return true;
			}
			match self.nodes[node.0].parent {
				Some(parent) => node = parent,
				None => return false,
			}
		}
	}
}

impl Platform for MemoryPlatform {
	type Handle = MemoryHandle;
	type Error = MemoryError;

	fn insert_before(&mut self, parent: &MemoryHandle, node: &MemoryHandle, before: Option<&MemoryHandle>) -> Result<(), MemoryError> {
		let (parent, node) = (*parent, *node);
		self.check(parent)?;
		self.check(node)?;
		if self.is_ancestor_or_self(node, parent) {
			return Err(MemoryError::Cycle { parent: parent.0, node: node.0 });
		}
		if let Some(&before) = before {
			self.check(before)?;
			if self.nodes[before.0].parent != Some(parent) {
				return Err(MemoryError::NotAChild { parent: parent.0, before: before.0 });
			}
			if before == node {
				trace!("Inserting node #{} before itself. Nothing to do.", node.0);
				return Ok(());
			}
		}

		if self.detach(node) {
			self.stats.moves += 1;
		} else {
			self.stats.inserts += 1;
		}

		let children = &mut self.nodes[parent.0].children;
		let position = before.and_then(|before| children.iter().position(|child| child == before)).unwrap_or(children.len());
		children.insert(position, node);
		self.nodes[node.0].parent = Some(parent);
		Ok(())
	}

	fn remove(&mut self, node: &MemoryHandle) -> Result<(), MemoryError> {
		self.check(*node)?;
		if self.detach(*node) {
			self.stats.removals += 1;
		}
		Ok(())
	}

	fn next_sibling(&self, node: &MemoryHandle) -> Option<MemoryHandle> {
		let parent = self.nodes.get(node.0)?.parent?;
		let siblings = &self.nodes[parent.0].children;
		let position = siblings.iter().position(|child| child == node)?;
		siblings.get(position + 1).copied()
	}
}
