//! Intrusive queue storage.
//!
//! Nodes live in a [`SlotMap`]; each node owns one [`Link`] per queue kind in
//! a [`SecondaryMap`], so a node can sit in several queues at once with
//! independent occupancy. A queue itself is only a head, a tail and a count.

use std::rc::{Rc, Weak};

use slotmap::{SecondaryMap, SlotMap};

use super::{LifecycleNode, NodeId, QueueKind};

/// Per-queue membership of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Link {
    /// Not in this queue.
    #[default]
    Unqueued,
    /// Queued, followed by another node.
    Next(NodeId),
    /// Queued and currently last.
    End,
}

#[derive(Debug, Default, Clone, Copy)]
struct QueueState {
    head: Option<NodeId>,
    tail: Option<NodeId>,
    count: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct NodeLinks {
    links: [Link; QueueKind::COUNT],
    released: bool,
}

impl NodeLinks {
    fn is_queued(&self) -> bool {
        self.links.iter().any(|l| *l != Link::Unqueued)
    }
}

#[derive(Default)]
pub(crate) struct Queues {
    nodes: SlotMap<NodeId, Weak<dyn LifecycleNode>>,
    links: SecondaryMap<NodeId, NodeLinks>,
    queues: [QueueState; QueueKind::COUNT],
}

impl Queues {
    pub(crate) fn register(&mut self, node: Weak<dyn LifecycleNode>) -> NodeId {
        let id = self.nodes.insert(node);
        self.links.insert(id, NodeLinks::default());
        id
    }

    /// Forget a node. A node still sitting in a queue is removed once it has
    /// been drained from every queue.
    pub(crate) fn release(&mut self, id: NodeId) {
        match self.links.get_mut(id) {
            Some(links) if links.is_queued() => links.released = true,
            Some(_) => {
                self.links.remove(id);
                self.nodes.remove(id);
            }
            None => {}
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn count(&self, kind: QueueKind) -> usize {
        self.queues[kind.index()].count
    }

    pub(crate) fn is_queued(&self, kind: QueueKind, id: NodeId) -> bool {
        self.links
            .get(id)
            .is_some_and(|links| links.links[kind.index()] != Link::Unqueued)
    }

    /// Append `id` to the queue. Returns `false` if it was already queued
    /// there or is unknown.
    pub(crate) fn enqueue(&mut self, kind: QueueKind, id: NodeId) -> bool {
        let k = kind.index();
        let Some(links) = self.links.get_mut(id) else {
            return false;
        };
        if links.released || links.links[k] != Link::Unqueued {
            return false;
        }
        links.links[k] = Link::End;

        let queue = &mut self.queues[k];
        match queue.tail {
            Some(tail) => {
                if let Some(tail_links) = self.links.get_mut(tail) {
                    tail_links.links[k] = Link::Next(id);
                }
            }
            None => queue.head = Some(id),
        }
        queue.tail = Some(id);
        queue.count += 1;
        true
    }

    /// Remove `id` from one queue, keeping the order of the rest. Returns
    /// `false` if it was not queued there.
    pub(crate) fn dequeue(&mut self, kind: QueueKind, id: NodeId) -> bool {
        let k = kind.index();
        let Some(link) = self.links.get(id).map(|links| links.links[k]) else {
            return false;
        };
        let next = match link {
            Link::Unqueued => return false,
            Link::Next(next) => Some(next),
            Link::End => None,
        };

        let mut previous = None;
        let mut cursor = self.queues[k].head;
        while let Some(current) = cursor {
            if current == id {
                break;
            }
            previous = Some(current);
            cursor = match self.links.get(current).map(|links| links.links[k]) {
                Some(Link::Next(after)) => Some(after),
                _ => None,
            };
        }
        if cursor.is_none() {
            return false;
        }

        match previous {
            Some(prev) => {
                if let Some(prev_links) = self.links.get_mut(prev) {
                    prev_links.links[k] = link;
                }
            }
            None => self.queues[k].head = next,
        }
        if next.is_none() {
            self.queues[k].tail = previous;
        }
        self.queues[k].count -= 1;
        if let Some(links) = self.links.get_mut(id) {
            links.links[k] = Link::Unqueued;
        }
        true
    }

    /// Detach the current contents of a queue, leaving it empty.
    ///
    /// Nodes are returned in FIFO order with their links already reset, so
    /// callbacks may re-enqueue them into a fresh list.
    pub(crate) fn take(&mut self, kind: QueueKind) -> Vec<(NodeId, Option<Rc<dyn LifecycleNode>>)> {
        let k = kind.index();
        let queue = std::mem::take(&mut self.queues[k]);
        let mut out = Vec::with_capacity(queue.count);
        let mut cursor = queue.head;
        while let Some(id) = cursor {
            let Some(links) = self.links.get_mut(id) else {
                break;
            };
            cursor = match std::mem::take(&mut links.links[k]) {
                Link::Next(next) => Some(next),
                Link::End | Link::Unqueued => None,
            };
            let node = self.nodes.get(id).and_then(Weak::upgrade);
            out.push((id, node));
        }
        out
    }

    /// Remove released nodes that are no longer queued, and nodes whose
    /// owner has been dropped.
    pub(crate) fn collect_garbage(&mut self, candidates: &[NodeId]) {
        for &id in candidates {
            let remove = match (self.links.get(id), self.nodes.get(id)) {
                (Some(links), Some(node)) => {
                    !links.is_queued() && (links.released || node.strong_count() == 0)
                }
                _ => false,
            };
            if remove {
                self.links.remove(id);
                self.nodes.remove(id);
            }
        }
    }
}
