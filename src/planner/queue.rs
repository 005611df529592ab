use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Stable handle of an estimate record for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RecordId(pub usize);

/// The six queues a record can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QueueKind {
    Start,
    Waiting,
    PartialEstimate,
    Estimated,
    Failed,
    Scheduled,
}

impl QueueKind {
    #[cfg(test)]
    pub(crate) const ALL: [Self; 6] = [
        Self::Start,
        Self::Waiting,
        Self::PartialEstimate,
        Self::Estimated,
        Self::Failed,
        Self::Scheduled,
    ];

    const fn index(self) -> usize {
        match self {
            Self::Start => 0,
            Self::Waiting => 1,
            Self::PartialEstimate => 2,
            Self::Estimated => 3,
            Self::Failed => 4,
            Self::Scheduled => 5,
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Waiting => "waiting",
            Self::PartialEstimate => "partial-estimate",
            Self::Estimated => "estimated",
            Self::Failed => "failed",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue membership violations. These are programming errors, never user input.
#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error("record {record} is already on the {queue} queue")]
    AlreadyQueued { record: usize, queue: QueueKind },

    #[error("record {record} is not on the {queue} queue")]
    NotQueued { record: usize, queue: QueueKind },

    #[error("unknown record {0}")]
    UnknownRecord(usize),
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    queue: Option<QueueKind>,
    prev: Option<RecordId>,
    next: Option<RecordId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Ends {
    head: Option<RecordId>,
    tail: Option<RecordId>,
    len: usize,
}

/// Index-stable intrusive doubly linked lists over the record arena.
///
/// Each record carries one link, so it is on at most one queue; unlink and
/// relink are O(1) and sorted insertion walks from the head.
#[derive(Debug, Default)]
pub(crate) struct Queues {
    links: Vec<Link>,
    ends: [Ends; 6],
}

impl Queues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate a link for a new record. The record starts on no queue.
    pub(crate) fn register(&mut self) -> RecordId {
        self.links.push(Link::default());
        RecordId(self.links.len() - 1)
    }

    fn link(&self, id: RecordId) -> Result<&Link, QueueError> {
        self.links.get(id.0).ok_or(QueueError::UnknownRecord(id.0))
    }

    pub(crate) fn queue_of(&self, id: RecordId) -> Option<QueueKind> {
        self.links.get(id.0).and_then(|link| link.queue)
    }

    pub(crate) const fn len(&self, kind: QueueKind) -> usize {
        self.ends[kind.index()].len
    }

    pub(crate) const fn is_empty(&self, kind: QueueKind) -> bool {
        self.len(kind) == 0
    }

    pub(crate) const fn head(&self, kind: QueueKind) -> Option<RecordId> {
        self.ends[kind.index()].head
    }

    pub(crate) const fn tail(&self, kind: QueueKind) -> Option<RecordId> {
        self.ends[kind.index()].tail
    }

    pub(crate) fn next(&self, id: RecordId) -> Option<RecordId> {
        self.links.get(id.0).and_then(|link| link.next)
    }

    pub(crate) fn prev(&self, id: RecordId) -> Option<RecordId> {
        self.links.get(id.0).and_then(|link| link.prev)
    }

    /// Snapshot of a queue from head to tail.
    pub(crate) fn ids(&self, kind: QueueKind) -> Vec<RecordId> {
        let mut out = Vec::with_capacity(self.len(kind));
        let mut cur = self.head(kind);
        while let Some(id) = cur {
            out.push(id);
            cur = self.next(id);
        }
        out
    }

    fn ensure_unqueued(&self, id: RecordId) -> Result<(), QueueError> {
        match self.link(id)?.queue {
            Some(queue) => Err(QueueError::AlreadyQueued { record: id.0, queue }),
            None => Ok(()),
        }
    }

    /// Append at the tail.
    pub(crate) fn enqueue(&mut self, kind: QueueKind, id: RecordId) -> Result<(), QueueError> {
        self.ensure_unqueued(id)?;
        let ends = &mut self.ends[kind.index()];
        let old_tail = ends.tail;
        ends.tail = Some(id);
        if ends.head.is_none() {
            ends.head = Some(id);
        }
        ends.len += 1;
        if let Some(tail) = old_tail {
            self.links[tail.0].next = Some(id);
        }
        self.links[id.0] = Link { queue: Some(kind), prev: old_tail, next: None };
        Ok(())
    }

    fn insert_before(&mut self, kind: QueueKind, id: RecordId, before: RecordId) {
        let prev = self.links[before.0].prev;
        self.links[id.0] = Link { queue: Some(kind), prev, next: Some(before) };
        self.links[before.0].prev = Some(id);
        let ends = &mut self.ends[kind.index()];
        match prev {
            Some(p) => self.links[p.0].next = Some(id),
            None => ends.head = Some(id),
        }
        ends.len += 1;
    }

    /// Insert before the first member that `id` sorts ahead of.
    ///
    /// Records comparing equal keep insertion order.
    pub(crate) fn insert_sorted<F>(
        &mut self,
        kind: QueueKind,
        id: RecordId,
        mut cmp: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut(RecordId, RecordId) -> Ordering,
    {
        self.ensure_unqueued(id)?;
        let mut cur = self.head(kind);
        while let Some(member) = cur {
            if cmp(id, member) == Ordering::Less {
                self.insert_before(kind, id, member);
                return Ok(());
            }
            cur = self.next(member);
        }
        self.enqueue(kind, id)
    }

    /// Unlink `id` from `kind`.
    pub(crate) fn remove(&mut self, kind: QueueKind, id: RecordId) -> Result<(), QueueError> {
        let link = *self.link(id)?;
        if link.queue != Some(kind) {
            return Err(QueueError::NotQueued { record: id.0, queue: kind });
        }
        let ends = &mut self.ends[kind.index()];
        match link.prev {
            Some(p) => self.links[p.0].next = link.next,
            None => ends.head = link.next,
        }
        match link.next {
            Some(n) => self.links[n.0].prev = link.prev,
            None => ends.tail = link.prev,
        }
        ends.len -= 1;
        self.links[id.0] = Link::default();
        Ok(())
    }

    /// Pop the head of `kind`.
    pub(crate) fn dequeue(&mut self, kind: QueueKind) -> Option<RecordId> {
        let head = self.head(kind)?;
        self.remove(kind, head).ok()?;
        Some(head)
    }

    /// Unlink from `from` and append to `to`.
    pub(crate) fn move_to(
        &mut self,
        id: RecordId,
        from: QueueKind,
        to: QueueKind,
    ) -> Result<(), QueueError> {
        self.remove(from, id)?;
        self.enqueue(to, id)
    }
}
