//! Intrusive red-black tree, keyed by `K: Ord`, non-owning.
//!
//! Backs `engine-resource`'s resource-unit manager tree (the "resource
//! unit manager tree under its own critical section" the shared-resource
//! policy keeps separate from the thread-local archive index): the key
//! is a resource's file path and the value is a `ResourceUnit` with its
//! own embedded tree-node storage. Not used for §4.10's thread→binder
//! index — `std::thread::ThreadId` has no stable `Ord`/numeric-value
//! accessor on stable Rust, so that index stays a `HashMap` (see
//! `archive.rs`). Standard left-leaning-free red-black tree (CLRS-style)
//! over raw pointers.

use core::cmp::Ordering as CmpOrdering;
use core::marker::PhantomData;
use core::ptr::NonNull;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

pub struct RbNode<K> {
    key: Option<K>,
    color: Color,
    parent: Option<NonNull<RbNode<K>>>,
    left: Option<NonNull<RbNode<K>>>,
    right: Option<NonNull<RbNode<K>>>,
}

impl<K> RbNode<K> {
    pub const fn new() -> Self {
        Self {
            key: None,
            color: Color::Red,
            parent: None,
            left: None,
            right: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.key.is_some()
    }
}

impl<K> Default for RbNode<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// # Safety
/// `node_to_value`/`value_to_node` must be inverses of one another, as
/// with [`crate::list::ListLink`].
pub unsafe trait RbLink<K> {
    fn value_to_node(ptr: NonNull<Self>) -> NonNull<RbNode<K>>;
    /// # Safety
    /// `node` must have been produced by `value_to_node` on a live `Self`.
    unsafe fn node_to_value(node: NonNull<RbNode<K>>) -> NonNull<Self>;
}

pub struct RbTree<K: Ord, T: RbLink<K>> {
    root: Option<NonNull<RbNode<K>>>,
    len: usize,
    _marker: PhantomData<(K, *const T)>,
}

unsafe impl<K: Ord + Send, T: RbLink<K> + Send> Send for RbTree<K, T> {}
unsafe impl<K: Ord + Sync, T: RbLink<K> + Sync> Sync for RbTree<K, T> {}

impl<K: Ord, T: RbLink<K>> RbTree<K, T> {
    pub const fn new() -> Self {
        Self {
            root: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    unsafe fn color(n: Option<NonNull<RbNode<K>>>) -> Color {
        match n {
            // SAFETY: caller guarantees `n` points at a live node.
            Some(n) => unsafe { n.as_ref() }.color,
            None => Color::Black,
        }
    }

    fn rotate_left(&mut self, x: NonNull<RbNode<K>>) {
        // SAFETY: x is a live node owned by this tree.
        unsafe {
            let mut x = x;
            let mut y = x.as_ref().right.expect("rotate_left needs a right child");
            x.as_mut().right = y.as_ref().left;
            if let Some(mut yl) = y.as_ref().left {
                yl.as_mut().parent = Some(x);
            }
            y.as_mut().parent = x.as_ref().parent;
            match x.as_ref().parent {
                None => self.root = Some(y),
                Some(mut p) => {
                    if p.as_ref().left == Some(x) {
                        p.as_mut().left = Some(y);
                    } else {
                        p.as_mut().right = Some(y);
                    }
                }
            }
            y.as_mut().left = Some(x);
            x.as_mut().parent = Some(y);
        }
    }

    fn rotate_right(&mut self, x: NonNull<RbNode<K>>) {
        // SAFETY: x is a live node owned by this tree.
        unsafe {
            let mut x = x;
            let mut y = x.as_ref().left.expect("rotate_right needs a left child");
            x.as_mut().left = y.as_ref().right;
            if let Some(mut yr) = y.as_ref().right {
                yr.as_mut().parent = Some(x);
            }
            y.as_mut().parent = x.as_ref().parent;
            match x.as_ref().parent {
                None => self.root = Some(y),
                Some(mut p) => {
                    if p.as_ref().right == Some(x) {
                        p.as_mut().right = Some(y);
                    } else {
                        p.as_mut().left = Some(y);
                    }
                }
            }
            y.as_mut().right = Some(x);
            x.as_mut().parent = Some(y);
        }
    }

    /// Inserts `value` keyed by `key`. `value`'s embedded node must not
    /// already be linked. Returns `false` (and does not insert) if `key`
    /// already exists.
    pub fn insert(&mut self, key: K, value: &T) -> bool {
        let mut node = T::value_to_node(NonNull::from(value));
        // SAFETY: node is valid for the duration of this call.
        unsafe {
            node.as_mut().key = Some(key);
            node.as_mut().left = None;
            node.as_mut().right = None;
            node.as_mut().parent = None;
            node.as_mut().color = Color::Red;
        }

        let mut parent = None;
        let mut cur = self.root;
        let mut went_left = false;
        while let Some(c) = cur {
            // SAFETY: c is live, part of this tree.
            let ckey = unsafe { c.as_ref().key.as_ref().unwrap() };
            let nkey = unsafe { node.as_ref().key.as_ref().unwrap() };
            match nkey.cmp(ckey) {
                CmpOrdering::Equal => return false,
                CmpOrdering::Less => {
                    parent = Some(c);
                    went_left = true;
                    cur = unsafe { c.as_ref().left };
                }
                CmpOrdering::Greater => {
                    parent = Some(c);
                    went_left = false;
                    cur = unsafe { c.as_ref().right };
                }
            }
        }

        // SAFETY: node is valid.
        unsafe {
            node.as_mut().parent = parent;
        }
        match parent {
            None => self.root = Some(node),
            Some(mut p) => {
                // SAFETY: p is live.
                unsafe {
                    if went_left {
                        p.as_mut().left = Some(node);
                    } else {
                        p.as_mut().right = Some(node);
                    }
                }
            }
        }
        self.len += 1;
        self.fixup_insert(node);
        true
    }

    fn fixup_insert(&mut self, mut z: NonNull<RbNode<K>>) {
        // SAFETY: all pointer chasing below stays within this tree's
        // live nodes.
        unsafe {
            while let Some(mut p) = z.as_ref().parent {
                if p.as_ref().color == Color::Black {
                    break;
                }
                let Some(mut gp) = p.as_ref().parent else {
                    break;
                };
                if Some(p) == gp.as_ref().left {
                    let uncle = gp.as_ref().right;
                    if Self::color(uncle) == Color::Red {
                        p.as_mut().color = Color::Black;
                        uncle.unwrap().as_mut().color = Color::Black;
                        gp.as_mut().color = Color::Red;
                        z = gp;
                    } else {
                        if Some(z) == p.as_ref().right {
                            z = p;
                            self.rotate_left(z);
                            p = z.as_ref().parent.unwrap();
                        }
                        p.as_mut().color = Color::Black;
                        gp.as_mut().color = Color::Red;
                        self.rotate_right(gp);
                    }
                } else {
                    let uncle = gp.as_ref().left;
                    if Self::color(uncle) == Color::Red {
                        p.as_mut().color = Color::Black;
                        uncle.unwrap().as_mut().color = Color::Black;
                        gp.as_mut().color = Color::Red;
                        z = gp;
                    } else {
                        if Some(z) == p.as_ref().left {
                            z = p;
                            self.rotate_right(z);
                            p = z.as_ref().parent.unwrap();
                        }
                        p.as_mut().color = Color::Black;
                        gp.as_mut().color = Color::Red;
                        self.rotate_left(gp);
                    }
                }
            }
            if let Some(mut r) = self.root {
                r.as_mut().color = Color::Black;
            }
        }
    }

    fn find_node(&self, key: &K) -> Option<NonNull<RbNode<K>>> {
        let mut cur = self.root;
        while let Some(c) = cur {
            // SAFETY: c is live.
            let ckey = unsafe { c.as_ref().key.as_ref().unwrap() };
            match key.cmp(ckey) {
                CmpOrdering::Equal => return Some(c),
                CmpOrdering::Less => cur = unsafe { c.as_ref().left },
                CmpOrdering::Greater => cur = unsafe { c.as_ref().right },
            }
        }
        None
    }

    pub fn find(&self, key: &K) -> Option<NonNull<T>> {
        self.find_node(key)
            // SAFETY: node came from this tree's own storage.
            .map(|n| unsafe { T::node_to_value(n) })
    }

    fn minimum(mut n: NonNull<RbNode<K>>) -> NonNull<RbNode<K>> {
        // SAFETY: walks live left-children within the tree.
        unsafe {
            while let Some(l) = n.as_ref().left {
                n = l;
            }
        }
        n
    }

    fn transplant(&mut self, u: NonNull<RbNode<K>>, v: Option<NonNull<RbNode<K>>>) {
        // SAFETY: u is live, part of this tree.
        unsafe {
            match u.as_ref().parent {
                None => self.root = v,
                Some(mut p) => {
                    if p.as_ref().left == Some(u) {
                        p.as_mut().left = v;
                    } else {
                        p.as_mut().right = v;
                    }
                }
            }
            if let Some(mut v) = v {
                v.as_mut().parent = u.as_ref().parent;
            }
        }
    }

    /// Removes `value` from the tree. No-op if not currently linked.
    pub fn remove(&mut self, value: &T) {
        let node = T::value_to_node(NonNull::from(value));
        // SAFETY: node is valid for this call.
        if !unsafe { node.as_ref() }.is_linked() {
            return;
        }
        self.remove_node(node);
        // SAFETY: node no longer part of the tree; clear its key so
        // `is_linked` reports false.
        unsafe {
            let mut node = node;
            node.as_mut().key = None;
            node.as_mut().left = None;
            node.as_mut().right = None;
            node.as_mut().parent = None;
        }
        self.len -= 1;
    }

    fn remove_node(&mut self, z: NonNull<RbNode<K>>) {
        // SAFETY: standard CLRS RB-delete over this tree's own pointers.
        unsafe {
            let mut y = z;
            let mut y_original_color = y.as_ref().color;
            let x;
            let x_parent;

            if z.as_ref().left.is_none() {
                x = z.as_ref().right;
                x_parent = z.as_ref().parent;
                self.transplant(z, z.as_ref().right);
            } else if z.as_ref().right.is_none() {
                x = z.as_ref().left;
                x_parent = z.as_ref().parent;
                self.transplant(z, z.as_ref().left);
            } else {
                y = Self::minimum(z.as_ref().right.unwrap());
                y_original_color = y.as_ref().color;
                x = y.as_ref().right;
                if y.as_ref().parent == Some(z) {
                    x_parent = Some(y);
                } else {
                    x_parent = y.as_ref().parent;
                    self.transplant(y, y.as_ref().right);
                    let mut y = y;
                    y.as_mut().right = z.as_ref().right;
                    y.as_ref().right.unwrap().as_mut().parent = Some(y);
                }
                self.transplant(z, Some(y));
                let mut y = y;
                y.as_mut().left = z.as_ref().left;
                y.as_ref().left.unwrap().as_mut().parent = Some(y);
                y.as_mut().color = z.as_ref().color;
            }

            if y_original_color == Color::Black {
                self.fixup_remove(x, x_parent);
            }
        }
    }

    fn fixup_remove(
        &mut self,
        mut x: Option<NonNull<RbNode<K>>>,
        mut x_parent: Option<NonNull<RbNode<K>>>,
    ) {
        // SAFETY: standard CLRS RB-delete-fixup over this tree's pointers.
        unsafe {
            while x != self.root && Self::color(x) == Color::Black {
                let Some(mut parent) = x_parent else { break };
                let is_left = parent.as_ref().left == x;
                if is_left {
                    let mut w = parent.as_ref().right.unwrap();
                    if w.as_ref().color == Color::Red {
                        w.as_mut().color = Color::Black;
                        parent.as_mut().color = Color::Red;
                        self.rotate_left(parent);
                        w = parent.as_ref().right.unwrap();
                    }
                    if Self::color(w.as_ref().left) == Color::Black
                        && Self::color(w.as_ref().right) == Color::Black
                    {
                        w.as_mut().color = Color::Red;
                        x = Some(parent);
                        x_parent = parent.as_ref().parent;
                    } else {
                        if Self::color(w.as_ref().right) == Color::Black {
                            if let Some(mut wl) = w.as_ref().left {
                                wl.as_mut().color = Color::Black;
                            }
                            w.as_mut().color = Color::Red;
                            self.rotate_right(w);
                            w = parent.as_ref().right.unwrap();
                        }
                        w.as_mut().color = parent.as_ref().color;
                        parent.as_mut().color = Color::Black;
                        if let Some(mut wr) = w.as_ref().right {
                            wr.as_mut().color = Color::Black;
                        }
                        self.rotate_left(parent);
                        x = self.root;
                        x_parent = None;
                    }
                } else {
                    let mut w = parent.as_ref().left.unwrap();
                    if w.as_ref().color == Color::Red {
                        w.as_mut().color = Color::Black;
                        parent.as_mut().color = Color::Red;
                        self.rotate_right(parent);
                        w = parent.as_ref().left.unwrap();
                    }
                    if Self::color(w.as_ref().right) == Color::Black
                        && Self::color(w.as_ref().left) == Color::Black
                    {
                        w.as_mut().color = Color::Red;
                        x = Some(parent);
                        x_parent = parent.as_ref().parent;
                    } else {
                        if Self::color(w.as_ref().left) == Color::Black {
                            if let Some(mut wr) = w.as_ref().right {
                                wr.as_mut().color = Color::Black;
                            }
                            w.as_mut().color = Color::Red;
                            self.rotate_left(w);
                            w = parent.as_ref().left.unwrap();
                        }
                        w.as_mut().color = parent.as_ref().color;
                        parent.as_mut().color = Color::Black;
                        if let Some(mut wl) = w.as_ref().left {
                            wl.as_mut().color = Color::Black;
                        }
                        self.rotate_right(parent);
                        x = self.root;
                        x_parent = None;
                    }
                }
            }
            if let Some(mut x) = x {
                x.as_mut().color = Color::Black;
            }
        }
    }

    /// In-order traversal, ascending by key.
    pub fn iter(&self) -> InOrderIter<'_, K, T> {
        InOrderIter {
            next: self.root.map(Self::minimum),
            _marker: PhantomData,
        }
    }
}

impl<K: Ord, T: RbLink<K>> Default for RbTree<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InOrderIter<'a, K, T> {
    next: Option<NonNull<RbNode<K>>>,
    _marker: PhantomData<&'a T>,
}

impl<'a, K: Ord, T: RbLink<K>> Iterator for InOrderIter<'a, K, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.next?;
        // SAFETY: successor-walk over this tree's live pointers.
        unsafe {
            self.next = if let Some(r) = n.as_ref().right {
                Some(RbTree::<K, T>::minimum(r))
            } else {
                let mut cur = n;
                let mut p = n.as_ref().parent;
                while let Some(pp) = p {
                    if pp.as_ref().left == Some(cur) {
                        break;
                    }
                    cur = pp;
                    p = pp.as_ref().parent;
                }
                p
            };
            Some(T::node_to_value(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry {
        node: RbNode<u32>,
        label: u32,
    }
    impl Entry {
        fn new(label: u32) -> Self {
            Self {
                node: RbNode::new(),
                label,
            }
        }
    }
    unsafe impl RbLink<u32> for Entry {
        fn value_to_node(ptr: NonNull<Self>) -> NonNull<RbNode<u32>> {
            unsafe { NonNull::new_unchecked(core::ptr::addr_of_mut!((*ptr.as_ptr()).node)) }
        }
        unsafe fn node_to_value(node: NonNull<RbNode<u32>>) -> NonNull<Self> {
            node.cast()
        }
    }

    #[test]
    fn insert_find_in_order() {
        let entries: Vec<Entry> = (0..20).map(Entry::new).collect();
        let mut tree: RbTree<u32, Entry> = RbTree::new();
        let keys = [10u32, 3, 17, 1, 9, 15, 19, 0, 5, 12];
        for (i, &k) in keys.iter().enumerate() {
            assert!(tree.insert(k, &entries[i]));
        }
        assert_eq!(tree.len(), keys.len());

        for &k in &keys {
            assert!(tree.find(&k).is_some());
        }
        assert!(tree.find(&999).is_none());

        let order: Vec<u32> = tree.iter().map(|p| unsafe { p.as_ref().label }).collect();
        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        assert_eq!(order, sorted);
    }

    #[test]
    fn remove_then_reinsert() {
        let entries: Vec<Entry> = (0..10).map(Entry::new).collect();
        let mut tree: RbTree<u32, Entry> = RbTree::new();
        let keys = [5u32, 2, 8, 1, 3, 7, 9];
        for (i, &k) in keys.iter().enumerate() {
            tree.insert(k, &entries[i]);
        }
        tree.remove(&entries[0]); // key 5
        assert!(tree.find(&5).is_none());
        assert_eq!(tree.len(), keys.len() - 1);

        let order: Vec<u32> = tree.iter().map(|p| unsafe { p.as_ref().label }).collect();
        assert_eq!(order, vec![1, 3, 7, 8, 9]);
    }
}
