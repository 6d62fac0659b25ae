//! Dispatch scheduler (C6): for each inbound message, builds the DAG of matching handlers implied
//! by their `before`/`after` edges, runs each as its own `spawn_local` task, and blocks the caller
//! (the read loop) until every `sync` handler has completed.
//!
//! Rather than modeling the "sync" requirement as a literal graph node with its own task, the
//! dispatch function awaits the completion barriers of the sync handlers directly after spawning
//! everything else. That is observationally identical to a sync node that every handler points
//! `before` into, and the caller never starts processing the next message before those handlers
//! finish either way.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tokio::sync::Notify;
use tokio::task::spawn_local;

use irc_wire::Message;

use crate::handler::{Dep, Handler, HandlerId};

/// A one-shot completion signal. `complete` is idempotent; `wait` returns immediately if the
/// barrier is already complete, otherwise parks until `complete` is called.
///
/// Race-free under this crate's single-threaded cooperative scheduling: between the `done.get()`
/// check and the first poll of `notified()` there is no `.await` point, so no other task can run
/// and call `complete` in between (the "missed wakeup" hazard `Notify` otherwise has).
///
/// Reused outside this module for the channel user-list's "users ready" latch (§4.8), which is
/// the same one-shot-completion shape.
#[derive(Clone)]
pub(crate) struct Barrier {
    notify: Rc<Notify>,
    done: Rc<Cell<bool>>,
}

impl Barrier {
    pub(crate) fn new() -> Self {
        Barrier {
            notify: Rc::new(Notify::new()),
            done: Rc::new(Cell::new(false)),
        }
    }

    pub(crate) fn complete(&self) {
        self.done.set(true);
        self.notify.notify_waiters();
    }

    pub(crate) async fn wait(&self) {
        if self.done.get() {
            return;
        }
        self.notify.notified().await;
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.done.get()
    }
}

/// Owns the live handler set and runs the per-message dispatch.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Rc<RefCell<Vec<Rc<Handler>>>>,
    next_id: Rc<Cell<HandlerId>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            handlers: Rc::new(RefCell::new(Vec::new())),
            next_id: Rc::new(Cell::new(0)),
        }
    }

    /// Reserves the next handler id. Callers build a `Handler` with this id (so its own `before`/
    /// `after` edges referencing it resolve) and pass it to [`Dispatcher::insert`].
    pub fn next_id(&self) -> HandlerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub fn insert(&self, handler: Handler) {
        self.handlers.borrow_mut().push(Rc::new(handler));
    }

    pub fn unregister(&self, id: HandlerId) {
        self.handlers.borrow_mut().retain(|h| h.id != id);
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    /// Drop every registered handler. Used by `stop_inner` to make sure a stopped client's
    /// dispatcher can't still be holding `Rc` cycles back into the connection state.
    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    /// Dispatches one message: matches it against every live handler, builds the dependency DAG
    /// restricted to the matched subset, detects cycles (logging and skipping the message
    /// entirely if one exists), spawns a task per handler, and awaits every `sync` handler's
    /// completion before returning.
    pub async fn dispatch(&self, msg: Message) {
        let matched: Vec<Rc<Handler>> = self
            .handlers
            .borrow()
            .iter()
            .filter(|h| !h.is_unregistered() && h.matches(&msg))
            .cloned()
            .collect();

        if matched.is_empty() {
            return;
        }

        let matched_ids: HashSet<HandlerId> = matched.iter().map(|h| h.id).collect();

        // predecessors[id] = set of handler ids that must complete before `id` runs.
        let mut predecessors: HashMap<HandlerId, HashSet<HandlerId>> =
            matched.iter().map(|h| (h.id, HashSet::new())).collect();

        for handler in &matched {
            for dep in &handler.before {
                if let Dep::Handler(target) = dep {
                    if matched_ids.contains(target) {
                        predecessors.get_mut(target).unwrap().insert(handler.id);
                    }
                }
            }
            for dep in &handler.after {
                if let Dep::Handler(target) = dep {
                    if matched_ids.contains(target) {
                        predecessors.get_mut(&handler.id).unwrap().insert(*target);
                    }
                }
            }
        }

        if let Some(cycle_desc) = find_cycle(&predecessors) {
            warn!(
                "dependency cycle detected among handlers, skipping message: {}",
                cycle_desc
            );
            return;
        }

        let barriers: HashMap<HandlerId, Barrier> =
            matched_ids.iter().map(|id| (*id, Barrier::new())).collect();

        let mut sync_barriers = Vec::new();

        for handler in &matched {
            let handler = handler.clone();
            let msg = msg.clone();
            let my_barrier = barriers[&handler.id].clone();
            let wait_on: Vec<Barrier> = predecessors[&handler.id]
                .iter()
                .map(|id| barriers[id].clone())
                .collect();

            if handler.is_sync() {
                sync_barriers.push(my_barrier.clone());
            }

            let handlers_for_unregister = self.handlers.clone();

            spawn_local(async move {
                for b in &wait_on {
                    b.wait().await;
                }
                // Run the callback in its own task so a panicking handler can't take the barrier
                // completion below with it; `JoinHandle::await` turns a panic into an `Err` rather
                // than propagating it into this task.
                let call_handler = handler.clone();
                let call_msg = msg.clone();
                let outcome = match spawn_local(async move { (call_handler.callback)(call_msg).await }).await {
                    Ok(outcome) => Some(outcome),
                    Err(join_err) => {
                        warn!("handler {:?} panicked: {}", handler.name, join_err);
                        None
                    }
                };
                if outcome == Some(crate::handler::HandlerOutcome::Unregister) {
                    handler.mark_unregistered();
                    handlers_for_unregister
                        .borrow_mut()
                        .retain(|h| h.id != handler.id);
                }
                my_barrier.complete();
            });
        }

        for barrier in sync_barriers {
            barrier.wait().await;
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// DFS-based cycle detection over the predecessor map. Returns a human-readable description of
/// one discovered cycle, or `None` if the graph is a DAG.
fn find_cycle(predecessors: &HashMap<HandlerId, HashSet<HandlerId>>) -> Option<String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<HandlerId, Color> =
        predecessors.keys().map(|id| (*id, Color::White)).collect();
    let mut path = Vec::new();

    fn visit(
        node: HandlerId,
        predecessors: &HashMap<HandlerId, HashSet<HandlerId>>,
        color: &mut HashMap<HandlerId, Color>,
        path: &mut Vec<HandlerId>,
    ) -> Option<String> {
        color.insert(node, Color::Gray);
        path.push(node);
        if let Some(preds) = predecessors.get(&node) {
            for &pred in preds {
                match color.get(&pred).copied().unwrap_or(Color::White) {
                    Color::White => {
                        if let Some(cycle) = visit(pred, predecessors, color, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Gray => {
                        let start = path.iter().position(|id| *id == pred).unwrap();
                        let cycle: Vec<String> =
                            path[start..].iter().map(|id| id.to_string()).collect();
                        return Some(cycle.join(" -> "));
                    }
                    Color::Black => {}
                }
            }
        }
        path.pop();
        color.insert(node, Color::Black);
        None
    }

    let keys: Vec<HandlerId> = predecessors.keys().copied().collect();
    for id in keys {
        if color[&id] == Color::White {
            if let Some(cycle) = visit(id, predecessors, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
