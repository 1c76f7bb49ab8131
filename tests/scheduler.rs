use sapling_dom::{
	error::AppError,
	platform::memory::MemoryPlatform,
	scheduler::{ScheduledCall, SchedulerState},
	tick_shared, Content, NodeId, SchedulingType, Suspension, TickDriver, Tree,
};
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};

use memory_nodes_::{children, log, setup, Boundary, Child, Echo, Failing, List, Log, Logged, Suspending, P};

struct Logs {
	a: NodeId,
	b: NodeId,
	c: NodeId,
	d: NodeId,
	e: NodeId,
}

/// Mounts `A(B(C(D)), E)` and clears the render log afterwards.
fn logged_tree() -> (Tree<P>, Logs, Log) {
	let (mut tree, body) = setup();
	let log = log();
	let d = Logged::new("D", &log, vec![]);
	let c = Logged::new("C", &log, vec![d]);
	let b = Logged::new("B", &log, vec![c]);
	let e = Logged::new("E", &log, vec![]);
	let a = tree.mount_root(Box::new(Logged::new("A", &log, vec![b, e])), body, None);
	assert_eq!(*log.borrow(), ["A", "B", "C", "D", "E"]);
	log.borrow_mut().clear();

	let (b, e) = (tree.children(a)[0], tree.children(a)[1]);
	let c = tree.children(b)[0];
	let d = tree.children(c)[0];
	(tree, Logs { a, b, c, d, e }, log)
}

fn call(f: impl Fn(&mut Tree<P>) -> Result<(), AppError> + 'static) -> ScheduledCall<P> {
	Rc::new(f)
}

fn logging(log: &Log, entry: &'static str) -> ScheduledCall<P> {
	let log = log.clone();
	call(move |_| {
		log.borrow_mut().push(entry.to_owned());
		Ok(())
	})
}

#[test]
fn shallow_nodes_first() {
	let (mut tree, ids, log) = logged_tree();
	for id in [ids.d, ids.b, ids.c, ids.e] {
		tree.request_update(id, SchedulingType::AnimationFrame);
	}
	assert_eq!(tree.scheduler().pending_len(), 4);
	tree.perform_tick();

	let log = log.borrow();
	let mut first = log[..2].to_vec();
	first.sort();
	assert_eq!(first, ["B", "E"]);
	assert_eq!(log[2..], ["C", "D"]);
}

#[test]
fn requests_are_deduplicated() {
	let (mut tree, ids, log) = logged_tree();
	tree.request_update(ids.b, SchedulingType::AnimationFrame);
	tree.request_update(ids.b, SchedulingType::AnimationFrame);
	assert_eq!(tree.scheduler().pending_len(), 1);
	tree.perform_tick();
	assert_eq!(*log.borrow(), ["B"]);
	assert!(!tree.has_pending_work());
}

#[test]
fn nodes_updated_through_an_ancestor_are_skipped() {
	let (mut tree, body) = setup();
	let items = children(vec![Child::Fragment(None, children(vec![Child::Leaf("a")]))]);
	let root = tree.mount_root(Box::new(List::host("host", items)), body, None);
	let fragment = tree.children(root)[0];

	tree.request_update(fragment, SchedulingType::AnimationFrame);
	tree.request_update(root, SchedulingType::AnimationFrame);
	tree.perform_tick();

	let renders = |id| tree.node::<List>(id).map(|list| list.renders);
	assert_eq!(renders(root), Some(2));
	assert_eq!(renders(fragment), Some(2));
	assert_eq!(tree.last_update_tick(fragment), Some(1));
}

#[test]
fn tick_counter() {
	let (mut tree, ids, _) = logged_tree();
	assert_eq!(tree.tick(), 0);

	// Ticks without node updates don't count.
	tree.schedule_call(call(|_| Ok(())), false, SchedulingType::AnimationFrame);
	tree.perform_tick();
	assert_eq!(tree.tick(), 0);

	tree.request_update(ids.a, SchedulingType::Sync);
	tree.request_update(ids.a, SchedulingType::Sync);
	assert_eq!(tree.tick(), 2);
	assert_eq!(tree.last_update_tick(ids.a), Some(2));
}

#[test]
fn timing_only_gets_more_urgent() {
	let (mut tree, ids, log) = logged_tree();
	assert_eq!(tree.scheduler().scheduled(), None);

	tree.request_update(ids.b, SchedulingType::AnimationFrame);
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));
	tree.request_update(ids.c, SchedulingType::Microtask);
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::Microtask));
	tree.request_update(ids.d, SchedulingType::AnimationFrame);
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::Microtask));
	assert!(log.borrow().is_empty());

	// Sync replaces the scheduled tick and covers all of its work.
	tree.request_update(ids.e, SchedulingType::Sync);
	assert_eq!(tree.scheduler().scheduled(), None);
	assert_eq!(log.borrow().len(), 4);
	assert_eq!(tree.tick(), 1);
	assert!(!tree.has_pending_work());
}

#[test]
fn sync_requests_from_render_run_before_returning() {
	let (mut tree, body) = setup();
	let root = tree.mount_root(
		Box::new(Echo {
			renders: 0,
			repeat: 2,
			timing: SchedulingType::Sync,
		}),
		body,
		None,
	);
	assert_eq!(tree.node::<Echo>(root).map(|echo| echo.renders), Some(3));
	assert_eq!(tree.tick(), 2);
	assert_eq!(tree.scheduler().scheduled(), None);
}

#[test]
fn deferred_requests_from_render_are_rescheduled() {
	let (mut tree, body) = setup();
	let root = tree.mount_root(
		Box::new(Echo {
			renders: 0,
			repeat: 2,
			timing: SchedulingType::AnimationFrame,
		}),
		body,
		None,
	);
	let renders = |tree: &Tree<P>| tree.node::<Echo>(root).map(|echo| echo.renders);
	assert_eq!(renders(&tree), Some(1));
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));

	tree.perform_tick();
	assert_eq!(renders(&tree), Some(2));
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));

	tree.perform_tick();
	assert_eq!(renders(&tree), Some(3));
	assert_eq!(tree.scheduler().scheduled(), None);
}

#[test]
fn phases() {
	let (mut tree, ids, log) = logged_tree();
	tree.request_update(ids.b, SchedulingType::AnimationFrame);
	tree.schedule_call(logging(&log, "after"), false, SchedulingType::AnimationFrame);
	tree.schedule_call(logging(&log, "before"), true, SchedulingType::AnimationFrame);
	tree.perform_tick();
	assert_eq!(*log.borrow(), ["before", "B", "after"]);
}

#[test]
fn requests_from_before_update_wait_one_tick() {
	let (mut tree, ids, log) = logged_tree();
	let b = ids.b;
	let states = Rc::new(Cell::new(None));
	tree.schedule_call(
		{
			let states = states.clone();
			call(move |tree| {
				states.set(Some(tree.scheduler_state()));
				tree.request_update(b, SchedulingType::AnimationFrame);
				Ok(())
			})
		},
		true,
		SchedulingType::AnimationFrame,
	);

	tree.perform_tick();
	assert_eq!(states.get(), Some(SchedulerState::BeforeUpdate));
	assert!(log.borrow().is_empty());
	assert!(tree.is_update_requested(b));
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));
	assert_eq!(tree.tick(), 0);

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["B"]);
	assert_eq!(tree.tick(), 1);
	assert!(!tree.has_pending_work());
	assert_eq!(tree.scheduler().scheduled(), None);
}

#[test]
fn requests_from_before_update_dont_join_the_current_batch() {
	let (mut tree, ids, log) = logged_tree();
	let d = ids.d;
	tree.request_update(ids.b, SchedulingType::AnimationFrame);
	tree.schedule_call(
		call(move |tree| {
			tree.request_update(d, SchedulingType::AnimationFrame);
			Ok(())
		}),
		true,
		SchedulingType::AnimationFrame,
	);

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["B"]);
	assert!(tree.is_update_requested(d));

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["B", "D"]);
}

#[test]
fn after_update_calls_scheduled_during_after_update_run_in_the_same_tick() {
	let (mut tree, _, log) = logged_tree();
	let second = logging(&log, "second after");
	tree.schedule_call(
		{
			let log = log.clone();
			call(move |tree| {
				log.borrow_mut().push("first after".to_owned());
				tree.schedule_call(second.clone(), false, SchedulingType::AnimationFrame);
				Ok(())
			})
		},
		false,
		SchedulingType::AnimationFrame,
	);

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["first after", "second after"]);
	assert!(!tree.has_pending_work());
	assert_eq!(tree.scheduler().scheduled(), None);
}

#[test]
fn after_update_calls_run_once_per_tick() {
	let (mut tree, _, _) = logged_tree();
	let count = Rc::new(Cell::new(0));
	let again: Rc<RefCell<Option<ScheduledCall<P>>>> = Rc::default();
	let rescheduling = {
		let (count, again) = (count.clone(), again.clone());
		call(move |tree| {
			count.set(count.get() + 1);
			if let Some(call) = again.borrow().clone() {
				tree.schedule_call(call, false, SchedulingType::AnimationFrame);
			}
			Ok(())
		})
	};
	*again.borrow_mut() = Some(rescheduling.clone());

	tree.schedule_call(rescheduling.clone(), false, SchedulingType::AnimationFrame);
	tree.perform_tick();
	assert_eq!(count.get(), 1);
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));

	tree.perform_tick();
	assert_eq!(count.get(), 2);

	assert!(tree.unschedule_call(&rescheduling, false));
	*again.borrow_mut() = None;
}

#[test]
fn deferred_after_update_calls_can_be_unscheduled_from_after_update() {
	let (mut tree, _, log) = logged_tree();
	let deferred = logging(&log, "deferred");
	tree.schedule_call(
		{
			let deferred = deferred.clone();
			call(move |tree| {
				tree.schedule_call(deferred.clone(), false, SchedulingType::AnimationFrame);
				Ok(())
			})
		},
		true,
		SchedulingType::AnimationFrame,
	);
	tree.schedule_call(
		{
			let deferred = deferred.clone();
			call(move |tree| {
				assert!(tree.unschedule_call(&deferred, false));
				Ok(())
			})
		},
		false,
		SchedulingType::AnimationFrame,
	);

	tree.perform_tick();
	tree.perform_tick();
	assert!(log.borrow().is_empty());
	assert!(!tree.has_pending_work());
}

#[test]
fn calls_scheduled_before_the_update_run_in_the_next_tick() {
	let (mut tree, _, log) = logged_tree();
	let second_before = logging(&log, "second before");
	let second_after = logging(&log, "second after");
	tree.schedule_call(
		{
			let log = log.clone();
			call(move |tree| {
				log.borrow_mut().push("first before".to_owned());
				tree.schedule_call(second_before.clone(), true, SchedulingType::AnimationFrame);
				tree.schedule_call(second_after.clone(), false, SchedulingType::AnimationFrame);
				Ok(())
			})
		},
		true,
		SchedulingType::AnimationFrame,
	);

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["first before"]);
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["first before", "second before", "second after"]);
	assert!(!tree.has_pending_work());
}

#[test]
fn calls_are_deduplicated_and_can_be_unscheduled() {
	let (mut tree, _, _) = logged_tree();
	let count = Rc::new(Cell::new(0));
	let counting = {
		let count = count.clone();
		call(move |_| {
			count.set(count.get() + 1);
			Ok(())
		})
	};

	tree.schedule_call(counting.clone(), false, SchedulingType::AnimationFrame);
	tree.schedule_call(counting.clone(), false, SchedulingType::AnimationFrame);
	tree.perform_tick();
	assert_eq!(count.get(), 1);

	tree.schedule_call(counting.clone(), true, SchedulingType::AnimationFrame);
	assert!(tree.unschedule_call(&counting, true));
	assert!(!tree.unschedule_call(&counting, true));
	tree.perform_tick();
	assert_eq!(count.get(), 1);
}

#[test]
fn failing_calls_dont_stop_the_others() {
	let (mut tree, _, log) = logged_tree();
	tree.schedule_call(call(|_| Err("nope".into())), false, SchedulingType::AnimationFrame);
	tree.schedule_call(logging(&log, "still running"), false, SchedulingType::AnimationFrame);
	tree.perform_tick();
	assert_eq!(*log.borrow(), ["still running"]);
}

#[test]
fn request_flags() {
	let (mut tree, ids, log) = logged_tree();
	tree.request_update(ids.b, SchedulingType::AnimationFrame);
	tree.request_partial_update(ids.c, SchedulingType::AnimationFrame);
	tree.request_partial_update(ids.b, SchedulingType::AnimationFrame);
	assert!(tree.is_update_requested(ids.b));
	assert!(tree.is_partial_update_requested(ids.b));
	assert!(!tree.is_update_requested(ids.c));
	assert!(tree.is_partial_update_requested(ids.c));

	tree.perform_tick();
	assert_eq!(*log.borrow(), ["B~", "B", "C~"]);
	for id in [ids.b, ids.c] {
		assert!(!tree.is_update_requested(id));
		assert!(!tree.is_partial_update_requested(id));
	}
}

#[test]
fn unmounting_drops_requests() {
	let (mut tree, ids, _) = logged_tree();
	tree.request_update(ids.d, SchedulingType::AnimationFrame);
	tree.request_update(ids.a, SchedulingType::Microtask);
	assert!(tree.has_pending_work());

	tree.unmount_root(ids.a);
	assert!(!tree.has_pending_work());
	assert!(!tree.is_update_requested(ids.d));

	// Requests for unmounted nodes are ignored.
	tree.request_update(ids.d, SchedulingType::Sync);
	assert_eq!(tree.tick(), 0);
}

#[test]
fn failures_go_to_the_nearest_boundary() {
	let (mut tree, body) = setup();
	let root = tree.mount_root(Box::new(Boundary::new(|| Content::node(Failing))), body, None);
	assert_eq!(tree.platform().outline(body), "boundary");
	assert_eq!(tree.scheduler().scheduled(), Some(SchedulingType::AnimationFrame));

	tree.perform_tick();
	assert_eq!(tree.platform().outline(body), "boundary(fallback)");
	let reports = &tree.node::<Boundary>(root).expect("boundary").reports;
	assert_eq!(*reports, [("boom".to_owned(), vec!["Boundary".to_owned(), "Failing".to_owned()])]);
}

#[test]
fn suspended_content_shows_once_resolved() {
	let (mut tree, body) = setup();
	let suspension = Suspension::new("data");
	let root = tree.mount_root(
		Box::new(Boundary::new({
			let suspension = suspension.clone();
			move || Content::node(Suspending(suspension.clone()))
		})),
		body,
		None,
	);
	assert_eq!(tree.platform().outline(body), "boundary");

	tree.perform_tick();
	assert_eq!(tree.platform().outline(body), "boundary(loading)");
	assert!(!tree.has_pending_work());

	suspension.resolve();
	assert!(tree.has_pending_work());
	tree.perform_tick();
	assert_eq!(tree.platform().outline(body), "boundary(loaded)");

	let reports = &tree.node::<Boundary>(root).expect("boundary").reports;
	assert_eq!(reports.len(), 1);
	assert_eq!(reports[0].0, "suspended: data");
}

#[test]
fn unhandled_failures_keep_the_tree_usable() {
	let (mut tree, body) = setup();
	let root = tree.mount_root(Box::new(Failing), body, None);
	assert!(tree.is_mounted(root));
	assert!(tree.children(root).is_empty());
	assert!(!tree.has_pending_work());

	tree.request_update(root, SchedulingType::Sync);
	assert_eq!(tree.tick(), 1);
	tree.unmount_root(root);
	assert!(tree.is_empty());
}

#[derive(Clone, Default)]
struct CountingDriver(Rc<Cell<usize>>);
impl TickDriver for CountingDriver {
	fn schedule(&mut self, _: SchedulingType) {
		self.0.set(self.0.get() + 1)
	}

	fn cancel(&mut self) {}
}

#[test]
fn skipped_shared_ticks_are_retried() {
	let mut platform = MemoryPlatform::new();
	let body = platform.create("body");
	let driver = CountingDriver::default();
	let mut tree = Tree::new(platform, Box::new(driver.clone()));
	let log = log();
	let root = tree.mount_root(Box::new(Logged::new("A", &log, vec![])), body, None);
	log.borrow_mut().clear();
	let tree = RefCell::new(tree);

	for _ in 0..3 {
		tree.borrow_mut().request_update(root, SchedulingType::AnimationFrame);
	}
	// The driver is only asked once while a tick is scheduled.
	assert_eq!(driver.0.get(), 1);

	let retried = Cell::new(false);
	{
		let _busy = tree.borrow();
		assert!(!tick_shared(&tree, || retried.set(true)));
	}
	assert!(retried.get());
	assert!(log.borrow().is_empty());
	assert!(tree.borrow().has_pending_work());

	assert!(tick_shared(&tree, || panic!("not borrowed")));
	assert_eq!(*log.borrow(), ["A"]);
	assert_eq!(tree.borrow().scheduler().scheduled(), None);

	tree.borrow_mut().request_update(root, SchedulingType::AnimationFrame);
	assert_eq!(driver.0.get(), 2);
}
