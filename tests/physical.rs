use sapling_dom::{platform::memory::OpStats, NodeId, Platform, SchedulingType, Tree, UpdateStrategy};

use memory_nodes_::{children, keyed, setup, Child, Children, Keeper, List, P};

/// Replaces what `id` renders and re-renders it.
fn rerender(tree: &mut Tree<P>, id: NodeId, items: &Children, new: Vec<Child>) {
	*items.borrow_mut() = new;
	tree.platform_mut().reset_stats();
	tree.request_update(id, SchedulingType::Sync);
}

fn stats(inserts: usize, moves: usize, removals: usize) -> OpStats {
	OpStats { inserts, moves, removals }
}

#[test]
fn mount_and_unmount() {
	let (mut tree, body) = setup();
	let items = children(vec![
		Child::Leaf("a"),
		Child::Fragment(None, children(vec![Child::Leaf("b"), Child::Leaf("c")])),
		Child::Host("d", children(vec![Child::Leaf("e")])),
	]);
	let root = tree.mount_root(Box::new(List::host("host", items)), body, None);
	assert_eq!(tree.platform().outline(body), "host(a,b,c,d(e))");
	assert_eq!(tree.len(), 7);

	let fragment = tree.children(root)[1];
	assert_eq!(tree.depth(fragment), Some(1));
	assert_eq!(tree.index(fragment), Some(1));
	assert_eq!(tree.parent(fragment), Some(root));
	assert_eq!(tree.path(tree.children(fragment)[1]), vec!["Host", "Fragment", "Leaf"]);
	assert_eq!(tree.own_dn(fragment), None);
	assert_eq!(tree.platform().label(tree.first_dn(fragment).expect("first DN")), "b");
	assert_eq!(tree.platform().label(tree.last_dn(fragment).expect("last DN")), "c");
	assert_eq!(tree.platform().label(tree.following_dn(fragment).expect("following DN")), "d");

	tree.platform_mut().reset_stats();
	tree.unmount_root(root);
	assert_eq!(tree.platform().outline(body), "");
	assert!(tree.is_empty());
	assert!(!tree.is_mounted(fragment));
	// Only the host's platform node is detached. Its descendants go with it.
	assert_eq!(tree.platform().stats(), stats(0, 0, 1));
}

#[test]
fn mount_before() {
	let (mut tree, body) = setup();
	let marker = tree.platform_mut().create("marker");
	tree.platform_mut().insert_before(&body, &marker, None).unwrap();
	tree.mount_root(Box::new(List::fragment(children(vec![Child::Leaf("a"), Child::Leaf("b")]))), body, Some(marker));
	assert_eq!(tree.platform().outline(body), "a,b,marker");
}

#[test]
fn keyed_reverse_keeps_nodes() {
	let (mut tree, body) = setup();
	let items = children(keyed(&[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]));
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);
	let before = tree.children(root).to_vec();

	rerender(&mut tree, root, &items, keyed(&[(5, "e"), (4, "d"), (3, "c"), (2, "b"), (1, "a")]));
	assert_eq!(tree.platform().outline(body), "host(e,d,c,b,a)");
	let after = tree.children(root).to_vec();
	assert_eq!(after, before.into_iter().rev().collect::<Vec<_>>());
	for (i, &child) in after.iter().enumerate() {
		assert_eq!(tree.index(child), Some(i));
	}
	let stats = tree.platform().stats();
	assert_eq!((stats.inserts, stats.removals), (0, 0));
}

#[test]
fn append_only_inserts() {
	let (mut tree, body) = setup();
	let items = children(keyed(&[(1, "a"), (2, "b")]));
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);

	rerender(&mut tree, root, &items, keyed(&[(1, "a"), (2, "b"), (3, "c")]));
	assert_eq!(tree.platform().outline(body), "host(a,b,c)");
	assert_eq!(tree.platform().stats(), stats(1, 0, 0));
}

#[test]
fn remove_from_the_middle() {
	let (mut tree, body) = setup();
	let items = children(keyed(&[(1, "a"), (2, "b"), (3, "c")]));
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);

	rerender(&mut tree, root, &items, keyed(&[(1, "a"), (3, "c")]));
	assert_eq!(tree.platform().outline(body), "host(a,c)");
	assert_eq!(tree.platform().stats(), stats(0, 0, 1));
	assert_eq!(tree.len(), 3);
}

#[test]
fn incompatible_kinds_replace_all() {
	let (mut tree, body) = setup();
	let items = children(vec![Child::Leaf("a"), Child::Leaf("b")]);
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);

	rerender(&mut tree, root, &items, vec![Child::Other("x"), Child::Other("y")]);
	assert_eq!(tree.platform().outline(body), "host(x,y)");
	assert_eq!(tree.platform().stats(), stats(2, 0, 2));
}

#[test]
fn unkeyed_labels_are_updated_in_place() {
	let (mut tree, body) = setup();
	let items = children(vec![Child::Leaf("a"), Child::Leaf("b")]);
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);

	rerender(&mut tree, root, &items, vec![Child::Leaf("x"), Child::Leaf("y")]);
	assert_eq!(tree.platform().outline(body), "host(x,y)");
	assert_eq!(tree.platform().stats(), stats(0, 0, 0));
}

#[test]
fn rotation_moves_one_group() {
	let (mut tree, body) = setup();
	let labels: Vec<&'static str> = vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17", "18", "19"];
	let original: Vec<Child> = labels.iter().zip(0..).map(|(&label, key)| Child::Keyed(key, label)).collect();
	let items = children(original.clone());
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);

	let mut rotated = original;
	rotated.rotate_right(1);
	rerender(&mut tree, root, &items, rotated);

	let mut expected = labels;
	expected.rotate_right(1);
	assert_eq!(tree.platform().child_labels(tree.own_dn(root).copied().expect("host")), expected);
	assert_eq!(tree.platform().stats(), stats(0, 1, 0));
}

#[test]
fn swapped_blocks_move_the_smaller_one() {
	let (mut tree, body) = setup();
	let original: Vec<Child> = (0..12).map(|key| Child::Keyed(key, "item")).collect();
	let items = children(original.clone());
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);
	let before = tree.children(root).to_vec();

	// [0..10] and [10..12] trade places.
	let mut swapped = original;
	swapped.rotate_left(10);
	rerender(&mut tree, root, &items, swapped);

	let after = tree.children(root).to_vec();
	assert_eq!(after[..2], before[10..]);
	assert_eq!(after[2..], before[..10]);
	assert_eq!(tree.platform().stats(), stats(0, 2, 0));
}

#[test]
fn keyed_fragments_move_as_a_whole() {
	let (mut tree, body) = setup();
	let first = children(vec![Child::Leaf("a"), Child::Leaf("b")]);
	let second = children(vec![Child::Leaf("c"), Child::Leaf("d")]);
	let items = children(vec![Child::Fragment(Some(1), first.clone()), Child::Fragment(Some(2), second.clone())]);
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);

	rerender(&mut tree, root, &items, vec![Child::Fragment(Some(2), second), Child::Fragment(Some(1), first)]);
	assert_eq!(tree.platform().outline(body), "host(c,d,a,b)");
	assert_eq!(tree.platform().stats(), stats(0, 2, 0));
}

#[test]
fn fragment_updates_in_place() {
	let (mut tree, body) = setup();
	let fragment_items = children(vec![Child::Leaf("a")]);
	let items = children(vec![Child::Leaf("x"), Child::Fragment(None, fragment_items.clone()), Child::Leaf("z")]);
	let root = tree.mount_root(Box::new(List::host("host", items.clone())), body, None);
	let fragment = tree.children(root)[1];

	// Through the parent.
	*fragment_items.borrow_mut() = vec![Child::Leaf("a"), Child::Leaf("b")];
	rerender(&mut tree, root, &items, vec![Child::Leaf("x"), Child::Fragment(None, fragment_items.clone()), Child::Leaf("z")]);
	assert_eq!(tree.platform().outline(body), "host(x,a,b,z)");
	assert_eq!(tree.children(root)[1], fragment);

	// Directly.
	rerender(&mut tree, fragment, &fragment_items, vec![Child::Leaf("c"), Child::Leaf("a"), Child::Leaf("b")]);
	assert_eq!(tree.platform().outline(body), "host(x,c,a,b,z)");

	rerender(&mut tree, fragment, &fragment_items, vec![]);
	assert_eq!(tree.platform().outline(body), "host(x,z)");
	assert!(tree.children(fragment).is_empty());

	// An empty fragment still knows where its content goes.
	rerender(&mut tree, fragment, &fragment_items, vec![Child::Leaf("y")]);
	assert_eq!(tree.platform().outline(body), "host(x,y,z)");
}

#[test]
fn strategy_is_inherited() {
	let (mut tree, body) = setup();
	let inner = children(keyed(&[(1, "a"), (2, "b")]));
	let items = children(vec![Child::Fragment(None, inner.clone())]);
	let mut host = List::host("host", items);
	host.strategy = Some(UpdateStrategy {
		ignore_keys: true,
		..UpdateStrategy::default()
	});
	let root = tree.mount_root(Box::new(host), body, None);
	let fragment = tree.children(root)[0];
	assert!(tree.effective_update_strategy(fragment).ignore_keys);

	// Matched by position, so no node moves: Only labels change.
	rerender(&mut tree, fragment, &inner, keyed(&[(2, "b"), (1, "a")]));
	assert_eq!(tree.platform().outline(body), "host(b,a)");
	assert_eq!(tree.platform().stats(), stats(0, 0, 0));
}

#[test]
fn retaining_every_child_changes_nothing() {
	let small = vec![
		Child::Leaf("a"),
		Child::Fragment(None, children(vec![Child::Leaf("b"), Child::Keyed(1, "c")])),
		Child::Keyed(2, "d"),
		Child::Host("e", children(vec![Child::Leaf("f")])),
	];
	let large = keyed(&[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e"), (6, "f"), (7, "g"), (8, "h"), (9, "i"), (10, "j")]);

	for (items, outline) in [(small, "keeper(a,b,c,d,e(f))"), (large, "keeper(a,b,c,d,e,f,g,h,i,j)")] {
		let (mut tree, body) = setup();
		let root = tree.mount_root(Box::new(Keeper::new(children(items))), body, None);
		let before = tree.children(root).to_vec();
		let size = tree.len();
		tree.node_mut::<Keeper>(root).expect("keeper").retain = Some(before.clone());

		tree.platform_mut().reset_stats();
		tree.request_update(root, SchedulingType::Sync);
		assert_eq!(tree.node::<Keeper>(root).map(|keeper| keeper.renders), Some(2));
		assert_eq!(tree.platform().stats(), OpStats::default());
		assert_eq!(tree.children(root), before);
		assert_eq!(tree.len(), size);
		assert_eq!(tree.platform().outline(body), outline);

		// And again through a scheduled tick.
		tree.request_update(root, SchedulingType::AnimationFrame);
		tree.perform_tick();
		assert_eq!(tree.node::<Keeper>(root).map(|keeper| keeper.renders), Some(3));
		assert_eq!(tree.platform().stats(), OpStats::default());
		assert_eq!(tree.children(root), before);
	}
}
