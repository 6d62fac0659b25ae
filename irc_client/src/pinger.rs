//! Idle watchdog and the message-quiescence probe (`waitForMessages`, `spec.md` §4.9).
//!
//! Replaces the teacher's `Pinger` (a fixed 60s-toggle PING/PONG loop with no relationship to any
//! particular in-flight command) with the spec's actual mechanism: a one-shot PONG-matching
//! handler keyed on a random token, used both as the idle watchdog's probe and as the ordering
//! barrier `nick::set_nick` waits on before committing a nick change.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::oneshot;

use irc_wire::Command;

use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::handler::{HandlerBuilder, HandlerOutcome, MatchSpec, MatchValue, ParamsMatch};
use crate::queue::{SendQueue, PRIO_CONTROL};

pub(crate) const PING_IDLE_TIME: Duration = Duration::from_secs(60);
pub(crate) const PING_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const WAIT_FOR_MESSAGES_TIMEOUT: Duration = Duration::from_secs(10);

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub(crate) fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Sends `PING <token>` at `priority`, registers a one-shot handler for the matching `PONG`, and
/// waits up to `timeout` for it. Returns whether the PONG arrived in time.
pub(crate) async fn wait_for_messages(
    dispatcher: &Dispatcher,
    queue: &SendQueue,
    priority: i32,
    timeout: Duration,
) -> bool {
    let token = random_token(8);
    let (tx, rx) = oneshot::channel();
    let tx = Rc::new(RefCell::new(Some(tx)));

    let id = dispatcher.next_id();
    let token_for_match = token.clone();
    let handler = HandlerBuilder::new("pinger:quiescence-probe")
        .on(
            MatchSpec::new()
                .command(MatchValue::exact("PONG"))
                .params(ParamsMatch::pred(move |params| {
                    params.iter().any(|p| p.eq_ignore_ascii_case(&token_for_match))
                })),
        )
        .build(id, move |_msg| {
            let tx = tx.clone();
            async move {
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(());
                }
                HandlerOutcome::Unregister
            }
        });
    dispatcher.insert(handler);

    if queue.push(priority, Command::ping(&token)).is_err() {
        dispatcher.unregister(id);
        return false;
    }

    let arrived = tokio::time::timeout(timeout, rx)
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    dispatcher.unregister(id);
    arrived
}

/// Runs until PING_IDLE_TIME elapses with no read/write activity, probes the server, and resolves
/// with a `ConnectionClosed` cause if the probe times out. `last_activity` is updated by the read
/// and write loops on every successful recv/send.
pub(crate) async fn idle_watchdog(
    last_activity: Rc<Cell<Instant>>,
    dispatcher: Dispatcher,
    queue: SendQueue,
) -> ClientError {
    loop {
        let elapsed = last_activity.get().elapsed();
        if elapsed < PING_IDLE_TIME {
            tokio::time::sleep(PING_IDLE_TIME - elapsed).await;
            continue;
        }

        let arrived = wait_for_messages(&dispatcher, &queue, PRIO_CONTROL, PING_TIMEOUT).await;
        if arrived {
            last_activity.set(Instant::now());
            continue;
        }

        return ClientError::ConnectionClosed("idle watchdog: no PONG within PING_TIMEOUT".to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_has_requested_length_and_alphabet() {
        let token = random_token(8);
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn wait_for_messages_succeeds_when_pong_matches() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dispatcher = Dispatcher::new();
                let queue = SendQueue::new();

                let dispatcher_clone = dispatcher.clone();
                let queue_clone = queue.clone();
                let probe = tokio::task::spawn_local(async move {
                    wait_for_messages(&dispatcher_clone, &queue_clone, PRIO_CONTROL, Duration::from_secs(1)).await
                });

                // Give the probe a chance to register its handler and push the PING.
                tokio::task::yield_now().await;
                let ping = queue.try_pop().expect("ping should have been queued");
                let token = match ping {
                    Command::Ping(t) => t,
                    other => panic!("expected Ping, got {:?}", other),
                };

                dispatcher
                    .dispatch(irc_wire::Message::new(Command::pong(&token)))
                    .await;

                assert!(probe.await.unwrap());
            })
            .await;
    }

    #[tokio::test]
    async fn wait_for_messages_times_out_without_pong() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dispatcher = Dispatcher::new();
                let queue = SendQueue::new();
                let arrived =
                    wait_for_messages(&dispatcher, &queue, PRIO_CONTROL, Duration::from_millis(20)).await;
                assert!(!arrived);
                assert!(dispatcher.is_empty());
            })
            .await;
    }
}
