use std::ptr::NonNull;

use tracing::trace;

use crate::chunked::iter::Direction;
use crate::segment::segment::{Segment, Value};

/// One chain node: a packed segment plus its cached entry count.
pub struct ChunkNode {
    pub(crate) prev: Option<NonNull<ChunkNode>>,
    pub(crate) next: Option<NonNull<ChunkNode>>,
    pub(crate) seg: Segment,
    /// entry count of `seg`
    pub(crate) count: usize,
}

impl ChunkNode {
    fn create() -> NonNull<ChunkNode> {
        unsafe {
            NonNull::new_unchecked(Box::into_raw(Box::new(ChunkNode {
                prev: None,
                next: None,
                seg: Segment::new(),
                count: 0,
            })))
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn segment(&self) -> &Segment {
        &self.seg
    }
}

/// A located entry: owning node, in-segment cursor, signed in-node
/// offset and the decoded value.
#[derive(Clone, Debug)]
pub struct ChunkEntry {
    pub(crate) node: Option<NonNull<ChunkNode>>,
    pub(crate) pos: usize,
    pub(crate) offset: i64,
    pub(crate) value: Option<Value>,
}

impl Default for ChunkEntry {
    fn default() -> Self {
        Self {
            node: None,
            pos: 0,
            offset: 0,
            value: None,
        }
    }
}

impl ChunkEntry {
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// Doubly linked chain of packed segments with cached totals.
///
/// Nodes are exclusively owned by the list; every link mutation runs
/// behind `&mut self`. The `fill` argument of the mutating calls caps
/// how many entries a single segment should hold and drives the
/// split/merge rebalancing.
pub struct ChunkedList {
    pub(crate) head: Option<NonNull<ChunkNode>>,
    pub(crate) tail: Option<NonNull<ChunkNode>>,
    /// total entries across all segments
    count: usize,
    /// number of chain nodes
    len: usize,
}

impl Default for ChunkedList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChunkedList {
    fn drop(&mut self) {
        self.clear();
    }
}

impl ChunkedList {
    pub fn new() -> Self {
        Self {
            head: None,
            tail: None,
            count: 0,
            len: 0,
        }
    }

    /// Total entry count.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of chain nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head_count(&self) -> usize {
        unsafe { self.head.map_or(0, |node| (*node.as_ptr()).count) }
    }

    pub fn tail_count(&self) -> usize {
        unsafe { self.tail.map_or(0, |node| (*node.as_ptr()).count) }
    }

    /// Free every node in chain order, leaving the list empty but
    /// usable.
    pub fn clear(&mut self) {
        unsafe {
            let mut current = self.head;
            while let Some(node) = current {
                let next = (*node.as_ptr()).next;
                drop(Box::from_raw(node.as_ptr()));
                current = next;
            }
        }
        self.head = None;
        self.tail = None;
        self.count = 0;
        self.len = 0;
    }

    /// Splice `new_node` after `old_node` when `after`, else before it.
    fn insert_node(
        &mut self,
        old_node: Option<NonNull<ChunkNode>>,
        new_node: NonNull<ChunkNode>,
        after: bool,
    ) {
        unsafe {
            if after {
                (*new_node.as_ptr()).prev = old_node;
                if let Some(old) = old_node {
                    (*new_node.as_ptr()).next = (*old.as_ptr()).next;
                    if let Some(next) = (*old.as_ptr()).next {
                        (*next.as_ptr()).prev = Some(new_node);
                    }
                    (*old.as_ptr()).next = Some(new_node);
                }
                if self.tail == old_node {
                    self.tail = Some(new_node);
                }
            } else {
                (*new_node.as_ptr()).next = old_node;
                if let Some(old) = old_node {
                    (*new_node.as_ptr()).prev = (*old.as_ptr()).prev;
                    if let Some(prev) = (*old.as_ptr()).prev {
                        (*prev.as_ptr()).next = Some(new_node);
                    }
                    (*old.as_ptr()).prev = Some(new_node);
                }
                if self.head == old_node {
                    self.head = Some(new_node);
                }
            }
            if self.len == 0 {
                self.head = Some(new_node);
                self.tail = Some(new_node);
            }
            self.len += 1;
        }
    }

    fn insert_node_before(
        &mut self,
        old_node: Option<NonNull<ChunkNode>>,
        new_node: NonNull<ChunkNode>,
    ) {
        self.insert_node(old_node, new_node, false);
    }

    fn insert_node_after(
        &mut self,
        old_node: Option<NonNull<ChunkNode>>,
        new_node: NonNull<ChunkNode>,
    ) {
        self.insert_node(old_node, new_node, true);
    }

    fn del_node(&mut self, node: NonNull<ChunkNode>) {
        unsafe {
            if let Some(next) = (*node.as_ptr()).next {
                (*next.as_ptr()).prev = (*node.as_ptr()).prev;
            }
            if let Some(prev) = (*node.as_ptr()).prev {
                (*prev.as_ptr()).next = (*node.as_ptr()).next;
            }
            if Some(node) == self.tail {
                self.tail = (*node.as_ptr()).prev;
            }
            if Some(node) == self.head {
                self.head = (*node.as_ptr()).next;
            }
            self.count -= (*node.as_ptr()).count;
            self.len -= 1;
            drop(Box::from_raw(node.as_ptr()));
        }
    }

    /// Delete one entry of `node` at cursor `pos`. Returns true when
    /// that emptied the node and the node itself was freed.
    pub(crate) fn del_index(&mut self, node: NonNull<ChunkNode>, pos: usize) -> bool {
        unsafe {
            let _ = (*node.as_ptr()).seg.delete(pos);
            (*node.as_ptr()).count -= 1;
            self.count -= 1;
            if (*node.as_ptr()).count == 0 {
                self.del_node(node);
                return true;
            }
            false
        }
    }

    pub fn push_head(&mut self, fill: usize, value: &[u8]) {
        unsafe {
            match self.head {
                Some(head) if (*head.as_ptr()).count < fill => {
                    (*head.as_ptr()).seg.push(value, true);
                }
                _ => {
                    let node = ChunkNode::create();
                    (*node.as_ptr()).seg.push(value, true);
                    self.insert_node_before(self.head, node);
                }
            }
            self.count += 1;
            if let Some(head) = self.head {
                (*head.as_ptr()).count += 1;
            }
        }
    }

    pub fn push_tail(&mut self, fill: usize, value: &[u8]) {
        unsafe {
            match self.tail {
                Some(tail) if (*tail.as_ptr()).count < fill => {
                    (*tail.as_ptr()).seg.push(value, false);
                }
                _ => {
                    let node = ChunkNode::create();
                    (*node.as_ptr()).seg.push(value, false);
                    self.insert_node_after(self.tail, node);
                }
            }
            self.count += 1;
            if let Some(tail) = self.tail {
                (*tail.as_ptr()).count += 1;
            }
        }
    }

    /// Direction-switch wrapper: `Forward` pushes at the head.
    pub fn push(&mut self, fill: usize, value: &[u8], direction: Direction) {
        match direction {
            Direction::Forward => self.push_head(fill, value),
            Direction::Reverse => self.push_tail(fill, value),
        }
    }

    /// Splice a pre-built segment as a new tail node (bulk load). An
    /// empty segment is ignored.
    pub fn push_tail_segment(&mut self, seg: Segment) {
        let count = seg.len();
        if count == 0 {
            return;
        }
        unsafe {
            let node = ChunkNode::create();
            (*node.as_ptr()).seg = seg;
            (*node.as_ptr()).count = count;
            let tail = self.tail;
            self.insert_node_after(tail, node);
            self.count += count;
        }
    }

    fn pop_inner(&mut self, head: bool) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        unsafe {
            let node = if head { self.head? } else { self.tail? };
            let pos = (*node.as_ptr()).seg.index(if head { 0 } else { -1 })?;
            let value = (*node.as_ptr()).seg.get(pos)?;
            self.del_index(node, pos);
            Some(value)
        }
    }

    pub fn pop_head(&mut self) -> Option<Value> {
        self.pop_inner(true)
    }

    pub fn pop_tail(&mut self) -> Option<Value> {
        self.pop_inner(false)
    }

    /// Locate the entry with signed global index `idx` (negatives count
    /// from the tail, -1 being the last entry).
    pub fn index(&self, idx: i64) -> Option<ChunkEntry> {
        let forward = idx >= 0;
        let target = if forward {
            idx as usize
        } else {
            idx.unsigned_abs() as usize - 1
        };
        if target >= self.count {
            return None;
        }
        unsafe {
            let mut current = if forward { self.head } else { self.tail };
            let mut accum = 0;
            while let Some(node) = current {
                let node_count = (*node.as_ptr()).count;
                if accum + node_count > target {
                    break;
                }
                accum += node_count;
                current = if forward {
                    (*node.as_ptr()).next
                } else {
                    (*node.as_ptr()).prev
                };
            }
            let node = current?;
            let offset = if forward {
                (target - accum) as i64
            } else {
                idx + accum as i64
            };
            let pos = (*node.as_ptr()).seg.index(offset)?;
            let value = (*node.as_ptr()).seg.get(pos);
            Some(ChunkEntry {
                node: Some(node),
                pos,
                offset,
                value,
            })
        }
    }

    pub fn insert_before(&mut self, fill: usize, entry: &ChunkEntry, value: &[u8]) {
        self.insert_inner(fill, entry, value, false);
    }

    pub fn insert_after(&mut self, fill: usize, entry: &ChunkEntry, value: &[u8]) {
        self.insert_inner(fill, entry, value, true);
    }

    fn insert_inner(&mut self, fill: usize, entry: &ChunkEntry, value: &[u8], after: bool) {
        unsafe {
            let Some(node) = entry.node else {
                trace!("insert into empty list");
                let new_node = ChunkNode::create();
                (*new_node.as_ptr()).seg.push(value, true);
                (*new_node.as_ptr()).count = 1;
                self.insert_node(None, new_node, after);
                self.count += 1;
                return;
            };

            let node_count = (*node.as_ptr()).count;
            let mut offset = entry.offset;
            if offset < 0 {
                offset += node_count as i64;
            }

            let full = node_count >= fill;
            let mut at_tail = false;
            let mut at_head = false;
            let mut full_next = false;
            let mut full_prev = false;

            if after && (*node.as_ptr()).seg.next(entry.pos).is_none() {
                at_tail = true;
                if let Some(next) = (*node.as_ptr()).next {
                    full_next = (*next.as_ptr()).count >= fill;
                }
            }
            if !after && (*node.as_ptr()).seg.prev(entry.pos).is_none() {
                at_head = true;
                if let Some(prev) = (*node.as_ptr()).prev {
                    full_prev = (*prev.as_ptr()).count >= fill;
                }
            }

            if !full && after {
                trace!("node has room, inserting after anchor");
                match (*node.as_ptr()).seg.next(entry.pos) {
                    Some(next_pos) => (*node.as_ptr()).seg.insert(next_pos, value),
                    None => (*node.as_ptr()).seg.push(value, false),
                }
                (*node.as_ptr()).count += 1;
            } else if !full && !after {
                trace!("node has room, inserting before anchor");
                (*node.as_ptr()).seg.insert(entry.pos, value);
                (*node.as_ptr()).count += 1;
            } else if full && at_tail && (*node.as_ptr()).next.is_some() && !full_next && after {
                trace!("anchor at tail of full node, pushing onto next node head");
                let next = (*node.as_ptr()).next.unwrap();
                (*next.as_ptr()).seg.push(value, true);
                (*next.as_ptr()).count += 1;
            } else if full && at_head && (*node.as_ptr()).prev.is_some() && !full_prev && !after {
                trace!("anchor at head of full node, pushing onto previous node tail");
                let prev = (*node.as_ptr()).prev.unwrap();
                (*prev.as_ptr()).seg.push(value, false);
                (*prev.as_ptr()).count += 1;
            } else if full
                && ((at_tail && (*node.as_ptr()).next.is_some() && full_next && after)
                    || (at_head && (*node.as_ptr()).prev.is_some() && full_prev && !after))
            {
                trace!("neighbour full as well, provisioning a new node");
                let new_node = ChunkNode::create();
                (*new_node.as_ptr()).seg.push(value, true);
                (*new_node.as_ptr()).count = 1;
                self.insert_node(Some(node), new_node, after);
            } else if full {
                trace!(offset, after, "splitting full node");
                let new_node = self.split_node(node, offset, after);
                (*new_node.as_ptr()).seg.push(value, after);
                (*new_node.as_ptr()).count += 1;
                self.insert_node(Some(node), new_node, after);
                self.merge_nodes(fill, node);
            }

            self.count += 1;
        }
    }

    /// Split `node` at `offset`. With `after` the new node receives the
    /// entries past the anchor, otherwise the entries in front of it;
    /// either way the new node is the one the inserted value is pushed
    /// onto so it lands adjacent to the anchor.
    fn split_node(&mut self, node: NonNull<ChunkNode>, offset: i64, after: bool) -> NonNull<ChunkNode> {
        unsafe {
            let new_node = ChunkNode::create();
            (*new_node.as_ptr()).seg = (*node.as_ptr()).seg.clone();

            // -1 below means "delete through the end"
            let (orig_start, orig_extent) = if after { (offset + 1, -1) } else { (0, offset) };
            let (new_start, new_extent) = if after { (0, offset + 1) } else { (offset, -1) };
            trace!(
                after,
                offset,
                orig_start,
                orig_extent,
                new_start,
                new_extent,
                "split ranges"
            );

            (*node.as_ptr()).seg.delete_range(orig_start, orig_extent);
            (*node.as_ptr()).count = (*node.as_ptr()).seg.len();

            (*new_node.as_ptr()).seg.delete_range(new_start, new_extent);
            (*new_node.as_ptr()).count = (*new_node.as_ptr()).seg.len();

            new_node
        }
    }

    /// Move every entry of the smaller of `a`/`b` into the larger one,
    /// preserving global order, and free the emptied node. `a` must be
    /// the left neighbour of `b`. Returns the surviving node, or `None`
    /// when either side was empty.
    fn merge_segments(
        &mut self,
        a: NonNull<ChunkNode>,
        b: NonNull<ChunkNode>,
    ) -> Option<NonNull<ChunkNode>> {
        unsafe {
            let a_count = (*a.as_ptr()).count;
            let b_count = (*b.as_ptr()).count;
            if a_count == 0 || b_count == 0 {
                return None;
            }
            let target_is_a = a_count > b_count;
            trace!(a_count, b_count, target_is_a, "merging neighbour nodes");

            if target_is_a {
                // append b's entries to a, in order
                let mut pos = (*b.as_ptr()).seg.index(0);
                while let Some(p) = pos {
                    let bytes = match (*b.as_ptr()).seg.get(p) {
                        Some(value) => value.to_bytes(),
                        None => break,
                    };
                    (*a.as_ptr()).seg.push(&bytes, false);
                    (*b.as_ptr()).count -= 1;
                    (*a.as_ptr()).count += 1;
                    pos = (*b.as_ptr()).seg.next(p);
                }
                self.del_node(b);
                Some(a)
            } else {
                // prepend a's entries to b, walking a in reverse
                let mut pos = (*a.as_ptr()).seg.index(-1);
                while let Some(p) = pos {
                    let bytes = match (*a.as_ptr()).seg.get(p) {
                        Some(value) => value.to_bytes(),
                        None => break,
                    };
                    (*b.as_ptr()).seg.push(&bytes, true);
                    (*a.as_ptr()).count -= 1;
                    (*b.as_ptr()).count += 1;
                    pos = (*a.as_ptr()).seg.prev(p);
                }
                self.del_node(a);
                Some(b)
            }
        }
    }

    /// After a split, try to compact the chain around `center`:
    /// (prev.prev, prev), (next, next.next), (prev, center) and finally
    /// the survivor of that with its next. Node references are re-read
    /// after every attempt since a merge frees one side.
    fn merge_nodes(&mut self, fill: usize, center: NonNull<ChunkNode>) {
        unsafe {
            let prev = (*center.as_ptr()).prev;
            let prev_prev = prev.and_then(|p| (*p.as_ptr()).prev);
            let next = (*center.as_ptr()).next;
            let next_next = next.and_then(|n| (*n.as_ptr()).next);

            if let (Some(p), Some(pp)) = (prev, prev_prev) {
                if (*p.as_ptr()).count + (*pp.as_ptr()).count <= fill {
                    self.merge_segments(pp, p);
                }
            }
            if let (Some(n), Some(nn)) = (next, next_next) {
                if (*n.as_ptr()).count + (*nn.as_ptr()).count <= fill {
                    self.merge_segments(n, nn);
                }
            }

            let mut center = center;
            if let Some(p) = (*center.as_ptr()).prev {
                if (*center.as_ptr()).count + (*p.as_ptr()).count <= fill {
                    if let Some(target) = self.merge_segments(p, center) {
                        center = target;
                    }
                }
            }
            if let Some(n) = (*center.as_ptr()).next {
                if (*center.as_ptr()).count + (*n.as_ptr()).count <= fill {
                    self.merge_segments(center, n);
                }
            }
        }
    }

    /// Replace the entry at global index `idx`. Returns false when the
    /// index is out of range; the list is unchanged in that case.
    pub fn replace_at_index(&mut self, idx: i64, value: &[u8]) -> bool {
        unsafe {
            match self.index(idx) {
                Some(entry) => {
                    let node = entry.node.unwrap();
                    match (*node.as_ptr()).seg.delete(entry.pos) {
                        Some(pos) => (*node.as_ptr()).seg.insert(pos, value),
                        None => (*node.as_ptr()).seg.push(value, false),
                    }
                    true
                }
                None => false,
            }
        }
    }

    /// Delete `count` entries starting at signed global index `start`.
    /// The count is clamped to what is actually there; for a negative
    /// start that is at most the distance to the tail. Returns false
    /// when nothing was deleted.
    pub fn del_range(&mut self, start: i64, count: i64) -> bool {
        if count <= 0 {
            return false;
        }
        let mut extent = count as usize;
        if start >= 0 {
            let avail = self.count as i64 - start;
            if avail > 0 && extent as i64 > avail {
                extent = avail as usize;
            }
        } else if extent > start.unsigned_abs() as usize {
            extent = start.unsigned_abs() as usize;
        }
        let Some(entry) = self.index(start) else {
            return false;
        };
        trace!(start, count, extent, "range delete");
        unsafe {
            let mut node = entry.node;
            let mut offset = entry.offset;
            while extent > 0 {
                let Some(nd) = node else { break };
                let next = (*nd.as_ptr()).next;
                let node_count = (*nd.as_ptr()).count;
                let del;
                let mut whole_node = false;
                if offset == 0 && extent >= node_count {
                    // the whole node is covered, no segment math needed
                    whole_node = true;
                    del = node_count;
                } else if offset >= 0 && extent + offset as usize >= node_count {
                    del = node_count - offset as usize;
                } else if offset < 0 {
                    // first round anchored from the tail; the distance
                    // to this node's end bounds the delete
                    del = (offset.unsigned_abs() as usize).min(extent);
                } else {
                    del = extent;
                }

                if whole_node {
                    trace!(node_count, "removing fully covered node");
                    self.del_node(nd);
                } else {
                    (*nd.as_ptr()).seg.delete_range(offset, del as i64);
                    (*nd.as_ptr()).count -= del;
                    self.count -= del;
                    if (*nd.as_ptr()).count == 0 {
                        self.del_node(nd);
                    }
                }
                extent -= del;
                node = next;
                offset = 0;
            }
        }
        true
    }

    /// Move the tail entry to the head. The tail value is copied out
    /// first (a push may reallocate the very segment it lives in), then
    /// pushed, then deleted through a freshly acquired cursor.
    pub fn rotate(&mut self, fill: usize) {
        if self.count <= 1 {
            return;
        }
        unsafe {
            let tail = self.tail.unwrap();
            let pos = match (*tail.as_ptr()).seg.index(-1) {
                Some(pos) => pos,
                None => return,
            };
            let bytes = match (*tail.as_ptr()).seg.get(pos) {
                Some(value) => value.to_bytes(),
                None => return,
            };

            self.push_head(fill, &bytes);

            let tail = self.tail.unwrap();
            if let Some(pos) = (*tail.as_ptr()).seg.index(-1) {
                self.del_index(tail, pos);
            }
        }
    }

    /// Deep copy: one fresh node per source node with a disjoint byte
    /// buffer. The source is never modified.
    pub fn dup(&self) -> ChunkedList {
        let mut copy = ChunkedList::new();
        unsafe {
            let mut current = self.head;
            while let Some(node) = current {
                let new_node = ChunkNode::create();
                (*new_node.as_ptr()).seg = (*node.as_ptr()).seg.clone();
                (*new_node.as_ptr()).count = (*node.as_ptr()).count;
                copy.count += (*node.as_ptr()).count;
                let tail = copy.tail;
                copy.insert_node_after(tail, new_node);
                current = (*node.as_ptr()).next;
            }
        }
        copy
    }
}

#[cfg(test)]
impl ChunkedList {
    /// Walk the chain and assert every structural invariant: link
    /// symmetry, cached counts, no empty nodes, and that forward and
    /// reverse iteration both visit exactly `count` entries.
    pub(crate) fn check_consistency(&mut self) {
        unsafe {
            let mut seen = 0;
            let mut nodes = 0;
            let mut prev: Option<NonNull<ChunkNode>> = None;
            let mut current = self.head;
            while let Some(node) = current {
                assert_eq!((*node.as_ptr()).prev, prev, "broken prev link");
                assert!((*node.as_ptr()).count >= 1, "empty node left attached");
                assert_eq!(
                    (*node.as_ptr()).count,
                    (*node.as_ptr()).seg.len(),
                    "cached node count out of sync"
                );
                seen += (*node.as_ptr()).count;
                nodes += 1;
                prev = current;
                current = (*node.as_ptr()).next;
            }
            assert_eq!(prev, self.tail, "tail does not end the chain");
            assert_eq!(nodes, self.len, "cached node total out of sync");
            assert_eq!(seen, self.count, "cached entry total out of sync");
        }
        let total = self.count;
        let forward = self.iter(Direction::Forward).count();
        assert_eq!(forward, total, "forward iteration count");
        let reverse = self.iter(Direction::Reverse).count();
        assert_eq!(reverse, total, "reverse iteration count");
    }

    pub(crate) fn verify(&mut self, len: usize, count: usize, head_count: usize, tail_count: usize) {
        self.check_consistency();
        assert_eq!(self.len, len, "node count");
        assert_eq!(self.count, count, "entry total");
        if self.len > 0 {
            assert_eq!(self.head_count(), head_count, "head node count");
            assert_eq!(self.tail_count(), tail_count, "tail node count");
        }
    }
}
