//! Nick state machine (C7): the three-valued `(current, pending, lock)` identity model, the
//! nick-increment rule, and the default handlers that keep `current`/`pending` in sync with the
//! server's view (forced renames, NICKNAMEINUSE collisions).

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use rand::Rng;
use tokio::sync::{Mutex, MutexGuard};

use irc_wire::Command;

use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::handler::{HandlerBuilder, HandlerOutcome, MatchSpec, MatchValue};
use crate::queue::{SendQueue, PRIO_CONTROL};

/// `current` is what the server is believed to know; `pending` is set for the duration of a
/// user-initiated nick change. `lock` serialises nick-mutating operations (set, registration
/// retries); reads of `current` via [`NickState::current`] go through the same lock, so they
/// naturally block for the duration of an in-flight change. [`NickState::matches_nick`] is the
/// non-blocking alternative recommended for identifying self in inbound messages.
pub struct NickState {
    current: RefCell<String>,
    pending: RefCell<Option<String>>,
    lock: Mutex<()>,
}

impl NickState {
    pub fn new(initial: impl Into<String>) -> Rc<NickState> {
        Rc::new(NickState {
            current: RefCell::new(initial.into()),
            pending: RefCell::new(None),
            lock: Mutex::new(()),
        })
    }

    /// Blocking reader: acquires the lock, so this parks for the duration of any in-flight nick
    /// change (`set_nick` or the startup handshake's registration retries).
    pub async fn current(&self) -> String {
        let _guard = self.lock.lock().await;
        self.current.borrow().clone()
    }

    /// Acquire and hold the nick lock indefinitely. Used by hand-off (§4.10 step 1) to freeze nick
    /// changes for the rest of the connection's life; the guard is dropped only when the whole
    /// client is torn down, so there's no corresponding release method.
    pub(crate) async fn acquire_lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Non-locking reader for code that already holds (or will never release) the lock, e.g.
    /// hand-off serialisation, which calls this after [`Self::acquire_lock`] has parked forever.
    pub(crate) fn peek_current(&self) -> String {
        self.current.borrow().clone()
    }

    /// Non-blocking: true if `v` is either the current nick or the one a change is in flight to.
    /// The recommended way to recognize messages addressed to or about this client.
    pub fn matches_nick(&self, v: &str) -> bool {
        if *self.current.borrow() == v {
            return true;
        }
        self.pending.borrow().as_deref() == Some(v)
    }

    /// Forces `current` directly, bypassing the lock and `pending`. Used only by the registration
    /// handshake (`spec.md` §4.9 step 3) to track which nick actually got through a NICKNAMEINUSE
    /// retry, before the permanent NICK/NICKNAMEINUSE handlers above are installed.
    pub(crate) fn force_current(&self, nick: &str) {
        *self.current.borrow_mut() = nick.to_owned();
    }

    /// Called by the NICK default handler when the server confirms a rename. `sender` is the
    /// nick the NICK message's prefix named (the renaming party); `new` is its new name.
    fn on_server_nick(&self, sender: &str, new: &str) {
        let pending_matches = self.pending.borrow().as_deref() == Some(sender);
        if pending_matches {
            *self.pending.borrow_mut() = Some(new.to_owned());
        } else if *self.current.borrow() == sender {
            *self.current.borrow_mut() = new.to_owned();
        }
    }

    /// Called by the NICKNAMEINUSE default handler for the rejected nick `x`.
    fn on_nickname_in_use(&self, x: &str, queue: &SendQueue) {
        let pending = self.pending.borrow().clone();
        match pending {
            Some(p) if x != p => {
                // Stale rejection for a name we're not (or no longer) trying; ignore.
            }
            Some(_) => {
                // Cancel the in-flight change: `set_nick`'s eventual commit (`current = pending`)
                // becomes a no-op once pending is forced back to the current value.
                let current = self.current.borrow().clone();
                *self.pending.borrow_mut() = Some(current);
            }
            None => {
                if *self.current.borrow() == x {
                    let incremented = increment_nick(x);
                    *self.current.borrow_mut() = incremented.clone();
                    let _ = queue.push(PRIO_CONTROL, Command::nick(&incremented));
                }
            }
        }
    }
}

/// `|<digits>` grows the number by one random decimal digit; anything else gets a fresh `|<digit>`
/// suffix. Keeps length bounded when many clients collide on the same base name at once.
pub fn increment_nick(nick: &str) -> String {
    if let Some(bar_idx) = nick.rfind('|') {
        let (base, suffix) = nick.split_at(bar_idx);
        let digits = &suffix[1..];
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            let digit = rand::thread_rng().gen_range(0..10);
            return format!("{}|{}{}", base, digits, digit);
        }
    }
    let digit = rand::thread_rng().gen_range(0..10);
    format!("{}|{}", nick, digit)
}

/// Orchestrates a user-initiated nick change per §4.7: acquire the lock, set `pending`, send
/// `NICK` at [`PRIO_CONTROL`], run the caller's message-quiescence probe as an ordering barrier,
/// then commit. `quiescence_probe` is `irc_client::lib::Client::wait_for_messages` bound to the
/// priority this change was sent at; it's threaded in as a callback so this module doesn't need
/// to depend on the connection core.
pub async fn set_nick<Probe, Fut>(
    state: &NickState,
    queue: &SendQueue,
    new_nick: &str,
    quiescence_probe: Probe,
) -> Result<(), ClientError>
where
    Probe: FnOnce(i32) -> Fut,
    Fut: Future<Output = bool>,
{
    let _guard = state.lock.lock().await;
    *state.pending.borrow_mut() = Some(new_nick.to_owned());

    if queue.push(PRIO_CONTROL, Command::nick(new_nick)).is_err() {
        *state.pending.borrow_mut() = None;
        let _ = queue.push(crate::queue::PRIO_AUTO_PONG, Command::quit(Some("nick change failed".to_owned())));
        return Err(ClientError::UsageError(format!(
            "failed to send NICK {}: send queue rejected it",
            new_nick
        )));
    }

    // Block until the server has processed everything up to and including the NICK we just
    // sent; this is what lets the two transition handlers above race-freely update `pending`/
    // `current` before we read `pending` back out here. If the probe never round-trips we can't
    // trust whatever `pending` holds, so report the failure instead of committing blind.
    let arrived = quiescence_probe(PRIO_CONTROL).await;
    if !arrived {
        *state.pending.borrow_mut() = None;
        return Err(ClientError::UsageError(format!(
            "nick change to {:?} timed out waiting for the server to process it",
            new_nick
        )));
    }

    let committed = state
        .pending
        .borrow()
        .clone()
        .unwrap_or_else(|| new_nick.to_owned());
    *state.current.borrow_mut() = committed;
    *state.pending.borrow_mut() = None;
    Ok(())
}

/// Registers the permanent NICK and NICKNAMEINUSE handlers that keep `state` in sync with the
/// server's view of this client's nick. Installed once, for the lifetime of the connection (not
/// to be confused with the startup-only WELCOME/NICKNAMEINUSE handlers C9 registers during the
/// registration handshake).
pub fn install_default_handlers(dispatcher: &Dispatcher, state: Rc<NickState>, queue: SendQueue) {
    let nick_state = state.clone();
    let nick_handler_id = dispatcher.next_id();
    let nick_handler = HandlerBuilder::new("nick-state:NICK")
        .on(MatchSpec::new().command(MatchValue::exact("NICK")))
        .sync(true)
        .build(nick_handler_id, move |msg| {
            let nick_state = nick_state.clone();
            async move {
                if let Command::Nick(new) = &msg.command {
                    if let Some(sender) = msg.pfx.as_ref().and_then(|p| p.nick()) {
                        nick_state.on_server_nick(sender, new);
                    }
                }
                HandlerOutcome::Continue
            }
        });
    dispatcher.insert(nick_handler);

    let collision_state = state;
    let collision_queue = queue;
    let collision_handler_id = dispatcher.next_id();
    let collision_handler = HandlerBuilder::new("nick-state:NICKNAMEINUSE")
        .on(MatchSpec::new().command(MatchValue::exact("433")))
        .sync(true)
        .build(collision_handler_id, move |msg| {
            let collision_state = collision_state.clone();
            let collision_queue = collision_queue.clone();
            async move {
                if let Command::Numeric(_, params) = &msg.command {
                    // `433 <client> <nick> :Nickname is already in use.`
                    if let Some(rejected) = params.get(1) {
                        collision_state.on_nickname_in_use(rejected, &collision_queue);
                    }
                }
                HandlerOutcome::Continue
            }
        });
    dispatcher.insert(collision_handler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_numeric_suffix() {
        let incremented = increment_nick("alice|7");
        assert!(incremented.starts_with("alice|7"));
        assert_eq!(incremented.len(), "alice|7".len() + 1);
    }

    #[test]
    fn appends_suffix_when_no_bar() {
        let incremented = increment_nick("alice");
        assert!(incremented.starts_with("alice|"));
        assert_eq!(incremented.len(), "alice|".len() + 1);
    }

    #[test]
    fn appends_suffix_when_bar_not_followed_by_digits() {
        let incremented = increment_nick("foo|bar");
        assert!(incremented.starts_with("foo|bar|"));
    }

    #[tokio::test]
    async fn matches_nick_checks_current_and_pending_without_blocking() {
        let state = NickState::new("alice");
        assert!(state.matches_nick("alice"));
        assert!(!state.matches_nick("bob"));

        *state.pending.borrow_mut() = Some("bob".to_owned());
        assert!(state.matches_nick("alice"));
        assert!(state.matches_nick("bob"));
    }

    #[tokio::test]
    async fn server_nick_updates_pending_when_sender_matches() {
        let state = NickState::new("alice");
        *state.pending.borrow_mut() = Some("alice".to_owned());
        state.on_server_nick("alice", "alice|1");
        assert_eq!(state.pending.borrow().as_deref(), Some("alice|1"));
        assert_eq!(*state.current.borrow(), "alice");
    }

    #[tokio::test]
    async fn nickname_in_use_increments_when_no_pending_change() {
        let state = NickState::new("alice");
        let queue = SendQueue::new();
        state.on_nickname_in_use("alice", &queue);
        assert_ne!(*state.current.borrow(), "alice");
        assert!(state.current.borrow().starts_with("alice|"));
        assert!(queue.try_pop().is_some());
    }

    #[tokio::test]
    async fn nickname_in_use_cancels_matching_pending_change() {
        let state = NickState::new("alice");
        *state.pending.borrow_mut() = Some("bob".to_owned());
        let queue = SendQueue::new();
        state.on_nickname_in_use("bob", &queue);
        assert_eq!(state.pending.borrow().as_deref(), Some("alice"));
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn nickname_in_use_ignores_stale_rejection() {
        let state = NickState::new("alice");
        *state.pending.borrow_mut() = Some("bob".to_owned());
        let queue = SendQueue::new();
        state.on_nickname_in_use("carol", &queue);
        assert_eq!(state.pending.borrow().as_deref(), Some("bob"));
    }
}
