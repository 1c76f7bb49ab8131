#![doc(html_root_url = "https://docs.rs/sapling-dom/0.1.0")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod children;
pub mod disp;
pub mod error;
pub mod group;
pub mod node;
mod physical;
pub mod platform;
pub mod scheduler;
pub mod tree;

pub use children::ChildrenUpdateRequest;
pub use disp::UpdateStrategy;
pub use node::{Content, Context, ErrorBoundary, Key, NodeId, RenderFailure, RenderOutcome, Suspension, VirtualNode};
pub use platform::Platform;
pub use scheduler::{tick_shared, ManualDriver, SchedulingType, TickDriver};
pub use tree::Tree;
