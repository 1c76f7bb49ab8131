//! The browser DOM as [`Platform`], and a [`TickDriver`] on top of `requestAnimationFrame` and promise microtasks.

use super::Platform;
use crate::{
	scheduler::{tick_shared, SchedulingType, TickDriver},
	tree::Tree,
};
use core::cell::{Cell, RefCell};
use js_sys::{Function, Promise};
use std::rc::Rc;
use tracing::{error, trace};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{Document, Node, Window};

/// Materializes into a [`Document`].
///
/// Creating nodes is up to the node kinds. The helpers here only cover the common cases.
#[derive(Debug, Clone)]
pub struct WebPlatform {
	document: Document,
}

impl WebPlatform {
	#[must_use]
	pub fn new(document: Document) -> Self {
		Self { document }
	}

	/// Uses the current window's document, if there is one.
	#[must_use]
	pub fn from_window() -> Option<Self> {
		web_sys::window()?.document().map(Self::new)
	}

	#[must_use]
	pub fn document(&self) -> &Document {
		&self.document
	}

	/// # Errors
	///
	/// Iff `tag` isn't a valid element name.
	pub fn create_element(&self, tag: &str) -> Result<Node, JsValue> {
		self.document.create_element(tag).map(Into::into)
	}

	#[must_use]
	pub fn create_text(&self, text: &str) -> Node {
		self.document.create_text_node(text).into()
	}

	#[must_use]
	pub fn create_comment(&self, comment: &str) -> Node {
		self.document.create_comment(comment).into()
	}
}

impl Platform for WebPlatform {
	type Handle = Node;
	type Error = JsValue;

	fn insert_before(&mut self, parent: &Node, node: &Node, before: Option<&Node>) -> Result<(), JsValue> {
		parent.insert_before(node, before).map(drop)
	}

	fn remove(&mut self, node: &Node) -> Result<(), JsValue> {
		match node.parent_node() {
			Some(parent) => parent.remove_child(node).map(drop),
			None => Ok(()),
		}
	}

	fn next_sibling(&self, node: &Node) -> Option<Node> {
		node.next_sibling()
	}
}

/// Runs `on_tick` from `requestAnimationFrame` or from a resolved promise, as requested.
///
/// Promise reactions can't be cancelled, so a cancelled microtask tick is disarmed instead and does nothing once it runs.
pub struct FrameDriver {
	window: Window,
	frame: Rc<Closure<dyn Fn(f64)>>,
	frame_handle: Option<i32>,
	microtask: Closure<dyn FnMut(JsValue)>,
	microtask_armed: Rc<Cell<bool>>,
}

impl FrameDriver {
	pub fn new(window: Window, on_tick: impl Fn() + 'static) -> Self {
		let on_tick: Rc<dyn Fn()> = Rc::new(on_tick);
		let frame = {
			let on_tick = Rc::clone(&on_tick);
			Rc::new(Closure::wrap(Box::new(move |_timestamp: f64| on_tick()) as Box<dyn Fn(f64)>))
		};
		let microtask_armed = Rc::new(Cell::new(false));
		let microtask = {
			let armed = Rc::clone(&microtask_armed);
			Closure::wrap(Box::new(move |_: JsValue| {
				if armed.replace(false) {
					on_tick()
				}
			}) as Box<dyn FnMut(JsValue)>)
		};
		Self {
			window,
			frame,
			frame_handle: None,
			microtask,
			microtask_armed,
		}
	}
}

fn request_frame(window: &Window, frame: &Closure<dyn Fn(f64)>) -> Option<i32> {
	match window.request_animation_frame(frame.as_ref().unchecked_ref::<Function>()) {
		Ok(handle) => Some(handle),
		Err(error) => {
			error!("Failed to request animation frame: {:?}", error);
			None
		}
	}
}

impl TickDriver for FrameDriver {
	fn schedule(&mut self, timing: SchedulingType) {
		trace!("Scheduling tick: {:?}", timing);
		match timing {
			SchedulingType::Microtask => {
				self.microtask_armed.set(true);
				let _ = Promise::resolve(&JsValue::UNDEFINED).then(&self.microtask);
			}
			SchedulingType::AnimationFrame | SchedulingType::Sync => self.frame_handle = request_frame(&self.window, &self.frame),
		}
	}

	fn cancel(&mut self) {
		self.microtask_armed.set(false);
		if let Some(handle) = self.frame_handle.take() {
			if let Err(error) = self.window.cancel_animation_frame(handle) {
				error!("Failed to cancel animation frame: {:?}", error);
			}
		}
	}

	fn waker(&self) -> Option<Rc<dyn Fn()>> {
		let (window, frame) = (self.window.clone(), Rc::clone(&self.frame));
		Some(Rc::new(move || {
			let _ = request_frame(&window, &frame);
		}))
	}
}

/// Creates a [`Tree`] on the current window's document that ticks on its own.
///
/// The tree is shared so that the [`FrameDriver`] can reach it. Ticks that fire while it's borrowed elsewhere are retried on the next frame.
#[must_use]
pub fn shared_tree() -> Option<Rc<RefCell<Tree<WebPlatform>>>> {
	let window = web_sys::window()?;
	let platform = WebPlatform::new(window.document()?);
	Some(Rc::new_cyclic(|weak: &std::rc::Weak<RefCell<Tree<WebPlatform>>>| {
		let weak = weak.clone();
		let retry: Rc<RefCell<Option<Rc<dyn Fn()>>>> = Rc::default();
		let driver = FrameDriver::new(window, {
			let retry = retry.clone();
			move || {
				if let Some(tree) = weak.upgrade() {
					tick_shared(&tree, || {
						if let Some(retry) = &*retry.borrow() {
							retry()
						}
					});
				}
			}
		});
		*retry.borrow_mut() = driver.waker();
		RefCell::new(Tree::new(platform, Box::new(driver)))
	}))
}
