//! Ordered traversal over the tree.
//!
//! The walk keeps an explicit stack of (ancestor, descent-side) pairs
//! instead of relying on parent links, so a damaged parent pointer
//! cannot derail an iteration that got its path from descent. A
//! per-lap emission counter caps the walk at the table size; a linked
//! cycle therefore ends the iteration instead of spinning.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{error, warn};

use super::{SearchOutcome, Side, Tree};
use crate::error::{Result, StoreError};
use crate::records::Handle;

/// Key order of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest key first.
    Ascending,
    /// Largest key first.
    Descending,
}

/// Iteration state, kept separate from the tree borrow so the public
/// iterator can own both.
pub(crate) struct Walk {
    direction: Direction,
    rotating: bool,
    stack: Vec<(Handle, Side)>,
    next: Option<Handle>,
    emitted: usize,
    lap_size: usize,
}

impl Walk {
    pub(crate) fn seed(
        tree: &mut Tree,
        direction: Direction,
        rotating: bool,
        start: Option<&[u8]>,
    ) -> Result<Walk> {
        let mut walk = Walk {
            direction,
            rotating,
            stack: Vec::new(),
            next: None,
            emitted: 0,
            lap_size: 0,
        };
        match start {
            None => walk.seed_extreme(tree)?,
            Some(key) => walk.seed_at(tree, key)?,
        }
        Ok(walk)
    }

    /// Side to keep descending towards for the first element.
    fn start_side(&self) -> Side {
        match self.direction {
            Direction::Ascending => Side::Left,
            Direction::Descending => Side::Right,
        }
    }

    /// Side holding a node's in-order successor subtree.
    fn advance_side(&self) -> Side {
        match self.direction {
            Direction::Ascending => Side::Right,
            Direction::Descending => Side::Left,
        }
    }

    /// Positions the walk at the first element in walk order.
    fn seed_extreme(&mut self, tree: &mut Tree) -> Result<()> {
        self.stack.clear();
        self.next = None;
        self.emitted = 0;
        self.lap_size = tree.size();
        let Some(mut node) = tree.root_node()? else {
            return Ok(());
        };
        let down = self.start_side();
        let bound = tree.store.all_count().max(0) as usize + 1;
        for _ in 0..bound {
            match tree.store.load_child(&mut node, down.slot(), false)? {
                Some(child) => {
                    self.stack.push((node.handle(), down));
                    node = child;
                }
                None => {
                    self.next = Some(node.handle());
                    return Ok(());
                }
            }
        }
        error!("seeding walked more nodes than the file holds, starting empty");
        self.stack.clear();
        Ok(())
    }

    /// Positions the walk at `key`, or at its nearest neighbor in walk
    /// direction when the key is absent.
    fn seed_at(&mut self, tree: &mut Tree, key: &[u8]) -> Result<()> {
        let order = Arc::clone(tree.store.schema().order());
        let landing = match tree.search(key) {
            Ok(SearchOutcome::Found { node, .. }) => Some(node),
            Ok(SearchOutcome::Miss { parent, .. }) => parent,
            Err(StoreError::Cycle(_)) => None,
            Err(e) => return Err(e),
        };
        let Some(landing) = landing else {
            self.lap_size = tree.size();
            return Ok(());
        };
        let landing_key = landing.key().to_vec();
        self.build_path_to(tree, &landing_key)?;

        // A miss can land on the wrong side of the seed key; step once
        // so the walk begins at the in-order neighbor in direction.
        let wrong_side = match self.direction {
            Direction::Ascending => order.compare(&landing_key, key) == Ordering::Less,
            Direction::Descending => order.compare(&landing_key, key) == Ordering::Greater,
        };
        if wrong_side {
            self.step(tree)?;
        }
        Ok(())
    }

    /// Rebuilds the descent stack from the root down to `target_key`.
    fn build_path_to(&mut self, tree: &mut Tree, target_key: &[u8]) -> Result<()> {
        self.stack.clear();
        self.next = None;
        self.emitted = 0;
        self.lap_size = tree.size();
        let order = Arc::clone(tree.store.schema().order());
        let Some(mut node) = tree.root_node()? else {
            return Ok(());
        };
        let bound = tree.store.all_count().max(0) as usize + 1;
        for _ in 0..bound {
            let side = match order.compare(target_key, node.key()) {
                Ordering::Equal => {
                    self.next = Some(node.handle());
                    return Ok(());
                }
                Ordering::Less => Side::Left,
                Ordering::Greater => Side::Right,
            };
            match tree.store.load_child(&mut node, side.slot(), false)? {
                Some(child) => {
                    self.stack.push((node.handle(), side));
                    node = child;
                }
                None => {
                    warn!("seed path broke below a node that was just reachable");
                    self.stack.clear();
                    return Ok(());
                }
            }
        }
        error!("seeding walked more nodes than the file holds, starting empty");
        self.stack.clear();
        self.next = None;
        Ok(())
    }

    /// Emits the current element and advances.
    pub(crate) fn next_row(&mut self, tree: &mut Tree) -> Option<Vec<u8>> {
        let cur_h = self.next?;
        if self.emitted >= self.lap_size {
            error!(
                emitted = self.emitted,
                size = self.lap_size,
                "ordered walk emitted more rows than the table holds, stopping"
            );
            self.next = None;
            return None;
        }
        let mut cur = match tree.store.load_node(cur_h, true) {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "ordered walk could not load its next node, stopping");
                self.next = None;
                return None;
            }
        };
        let row = match tree.store.node_row(&mut cur) {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "ordered walk could not read a row, stopping");
                self.next = None;
                return None;
            }
        };
        self.emitted += 1;
        if let Err(e) = self.step(tree) {
            warn!(error = %e, "ordered walk could not advance, stopping");
            self.next = None;
        }
        Some(row)
    }

    /// Moves `next` to the in-order neighbor in walk direction.
    fn step(&mut self, tree: &mut Tree) -> Result<()> {
        let Some(cur_h) = self.next else {
            return Ok(());
        };
        let mut cur = match tree.store.load_node(cur_h, false) {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "current walk node vanished, stopping");
                self.next = None;
                return Ok(());
            }
        };
        let down = self.advance_side();
        match tree.store.load_child(&mut cur, down.slot(), false)? {
            Some(mut node) => {
                // Successor is the extreme of the subtree on the
                // advance side.
                self.stack.push((cur_h, down));
                let back = self.start_side();
                let bound = tree.store.all_count().max(0) as usize + 1;
                for _ in 0..bound {
                    match tree.store.load_child(&mut node, back.slot(), false)? {
                        Some(child) => {
                            self.stack.push((node.handle(), back));
                            node = child;
                        }
                        None => {
                            self.next = Some(node.handle());
                            return Ok(());
                        }
                    }
                }
                error!("advancing walked more nodes than the file holds, stopping");
                self.next = None;
            }
            None => {
                // Climb back to the first ancestor we entered from the
                // start side.
                self.next = None;
                while let Some((ancestor, side)) = self.stack.pop() {
                    if side != down {
                        self.next = Some(ancestor);
                        break;
                    }
                }
                if self.next.is_none() && self.rotating {
                    self.seed_extreme(tree)?;
                }
            }
        }
        Ok(())
    }
}

/// Iterator over rows in key order. Owns a mutable borrow of the
/// tree, so no structural change can interleave with it.
pub struct Rows<'a> {
    tree: &'a mut Tree,
    walk: Walk,
}

impl<'a> Rows<'a> {
    pub(crate) fn new(tree: &'a mut Tree, walk: Walk) -> Self {
        Self { tree, walk }
    }
}

impl Iterator for Rows<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.walk.next_row(self.tree)
    }
}
