//! Prioritised send queue (C4): a multi-level FIFO, one deque per priority actually in use, with
//! a mutable admission cap used during startup (registration) and hand-off drain.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::sync::Notify;

use irc_wire::Command;

/// Registration traffic: PASS, NICK, USER. Strict ordering, sent before anything else.
pub const PRIO_REGISTRATION: i32 = -2;
/// Automatic PONG replies to the server's keepalive PINGs.
pub const PRIO_AUTO_PONG: i32 = -1;
/// Control traffic: user-initiated NICK, idle-watchdog PING, quit-on-error.
pub const PRIO_CONTROL: i32 = 0;
/// Default priority for ordinary user messages.
pub const PRIO_DEFAULT: i32 = 16;

#[derive(Debug)]
struct Inner {
    // Lower key = higher priority. BTreeMap keeps buckets ordered so draining is just
    // "pop front of the first non-empty bucket".
    buckets: RefCell<BTreeMap<i32, VecDeque<Command>>>,
    /// Messages whose priority is greater (lower priority) than this are rejected. `None` means
    /// no cap.
    cap: Cell<Option<i32>>,
    /// Hand-off sets this once quiesce begins; every subsequent `push` is rejected.
    closed: Cell<bool>,
    /// Pulsed whenever a message is pushed, so the write loop (parked on an empty queue) wakes.
    notify: Notify,
}

/// A priority-ordered outbound queue. Cheap to clone (an `Rc` handle), matching this crate's
/// single-task-per-connection, `Rc<RefCell<_>>`-based concurrency model.
#[derive(Debug, Clone)]
pub struct SendQueue {
    inner: Rc<Inner>,
}

/// Returned by [`SendQueue::push`] when the message was rejected outright (cap exceeded, or the
/// queue closed for hand-off) rather than enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    OverCap { priority: i32, cap: i32 },
    Closed,
}

impl SendQueue {
    pub fn new() -> Self {
        SendQueue {
            inner: Rc::new(Inner {
                buckets: RefCell::new(BTreeMap::new()),
                cap: Cell::new(None),
                closed: Cell::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Temporarily restrict admission to messages at priority `<= limit`. Used during startup
    /// (registration) and during hand-off drain.
    pub fn set_cap(&self, limit: Option<i32>) {
        self.inner.cap.set(limit);
    }

    /// Reject all further pushes. Used by hand-off quiesce; irreversible for this queue's
    /// lifetime (a fresh `SendQueue` is created on reconnect). Wakes any task parked in
    /// [`SendQueue::pop_or_closed`] or [`SendQueue::wait_until_empty`] so closing an idle queue
    /// doesn't leave the write loop blocked forever.
    pub fn close(&self) {
        self.inner.closed.set(true);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Enqueue a command at the given priority. Logs and drops (returning `Err`) if the queue is
    /// closed or the priority is over the current cap; callers decide whether that's fatal.
    pub fn push(&self, priority: i32, command: Command) -> Result<(), PushError> {
        if self.inner.closed.get() {
            warn!("dropping message, send queue closed for hand-off: {:?}", command);
            return Err(PushError::Closed);
        }
        if let Some(cap) = self.inner.cap.get() {
            if priority > cap {
                warn!(
                    "dropping message at priority {} over cap {}: {:?}",
                    priority, cap, command
                );
                return Err(PushError::OverCap { priority, cap });
            }
        }
        self.inner
            .buckets
            .borrow_mut()
            .entry(priority)
            .or_default()
            .push_back(command);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest message in the highest-priority non-empty bucket, if any.
    pub fn try_pop(&self) -> Option<Command> {
        let mut buckets = self.inner.buckets.borrow_mut();
        let mut emptied = None;
        let popped = buckets.iter_mut().find_map(|(prio, queue)| {
            let item = queue.pop_front();
            if queue.is_empty() {
                emptied = Some(*prio);
            }
            item.map(|item| (*prio, item))
        });
        if let Some(prio) = emptied {
            buckets.remove(&prio);
        }
        popped.map(|(_, command)| command)
    }

    /// Wait until a message is available, then pop it. Used by the write loop.
    pub async fn pop(&self) -> Command {
        loop {
            if let Some(command) = self.try_pop() {
                return command;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Like [`SendQueue::pop`], but returns `None` once the queue is closed and has drained,
    /// instead of waiting forever. Used by the write loop so hand-off's `close()` makes it exit.
    pub async fn pop_or_closed(&self) -> Option<Command> {
        loop {
            if let Some(command) = self.try_pop() {
                return Some(command);
            }
            if self.is_closed() {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buckets.borrow().is_empty()
    }

    /// Block until the queue drains completely. Used by hand-off quiesce after `close()`.
    pub async fn wait_until_empty(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irc_wire::Command;

    #[test]
    fn pops_in_strict_priority_order_then_fifo() {
        let queue = SendQueue::new();
        queue.push(PRIO_DEFAULT, Command::ping("a")).unwrap();
        queue.push(PRIO_CONTROL, Command::ping("b")).unwrap();
        queue.push(PRIO_DEFAULT, Command::ping("c")).unwrap();
        queue.push(PRIO_REGISTRATION, Command::ping("d")).unwrap();

        assert_eq!(queue.try_pop(), Some(Command::ping("d")));
        assert_eq!(queue.try_pop(), Some(Command::ping("b")));
        assert_eq!(queue.try_pop(), Some(Command::ping("a")));
        assert_eq!(queue.try_pop(), Some(Command::ping("c")));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn cap_rejects_lower_priority_messages() {
        let queue = SendQueue::new();
        queue.set_cap(Some(PRIO_REGISTRATION));
        assert!(queue.push(PRIO_CONTROL, Command::ping("x")).is_err());
        assert!(queue.push(PRIO_REGISTRATION, Command::ping("y")).is_ok());
    }

    #[test]
    fn closed_queue_rejects_everything() {
        let queue = SendQueue::new();
        queue.close();
        assert_eq!(
            queue.push(PRIO_DEFAULT, Command::ping("x")),
            Err(PushError::Closed)
        );
    }
}
