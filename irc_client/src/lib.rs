//! Connection core (C9) and the top-level [`Client`] API: socket lifecycle, registration
//! handshake, read/write loop, idle watchdog wiring, stop semantics, and hand-off.
//!
//! Everything in this crate runs on a single `tokio` `LocalSet` task per connection: state is
//! `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>`, and there is no `Send`/`Sync` bound anywhere.
//! Embedders are expected to drive one connection (one `Client`) per `LocalSet`.

mod channel;
mod dispatch;
mod error;
mod handler;
mod handoff;
mod nick;
mod pinger;
mod queue;
mod stream;
mod utils;

pub use channel::{Channel, UserListView, BASE_MODE};
pub use dispatch::Dispatcher;
pub use error::ClientError;
pub use handler::{
    Dep, HandlerBuilder, HandlerId, HandlerOutcome, MatchSpec, MatchValue, ParamsMatch,
};
pub use queue::{PRIO_AUTO_PONG, PRIO_CONTROL, PRIO_DEFAULT, PRIO_REGISTRATION};

pub use irc_wire::{Command, Message, ModeChange, MsgTarget, Pfx, ServerProperties};

#[macro_use]
extern crate log;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use irc_common::{ascii_fold, CaseFold, ChanName, ChanNameRef};
use irc_wire::parse_irc_msg;

use crate::dispatch::Barrier;
use crate::nick::NickState;
use crate::queue::{PushError, SendQueue};

/// How long [`Client::start`] waits for RPL_WELCOME before giving up.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for [`Client::open`].
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub password: Option<String>,
    pub ident: Option<String>,
    pub real_name: Option<String>,
    pub nickserv_password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

type Channels = Rc<RefCell<HashMap<ChanName, Rc<Channel>>>>;

struct ClientState {
    server: ServerInfo,
    queue: SendQueue,
    dispatcher: Dispatcher,
    nick_state: Rc<NickState>,
    channels: Channels,
    server_properties: Rc<RefCell<ServerProperties>>,
    fold: CaseFold,

    lifecycle: Cell<Lifecycle>,
    last_activity: Rc<Cell<Instant>>,
    recv_buf: Rc<RefCell<Vec<u8>>>,

    io_task: RefCell<Option<JoinHandle<()>>>,
    io_give_back: RefCell<Option<oneshot::Receiver<TcpStream>>>,
    watchdog_task: RefCell<Option<JoinHandle<()>>>,
    handoff_in_progress: Cell<bool>,

    stop_barrier: Barrier,
    stop_cause: RefCell<Option<Rc<ClientError>>>,
    stop_handlers: RefCell<Vec<Box<dyn Fn(&Client)>>>,
}

/// A single IRC connection: registration, send queue, dispatch, nick/channel state, hand-off.
/// Cheap to clone — every clone shares the same underlying connection.
#[derive(Clone)]
pub struct Client(Rc<ClientState>);

impl Client {
    /// Build a client in the [`Lifecycle::Created`] state. Nothing happens on the wire until
    /// [`Client::start`] is called.
    pub fn open(server: ServerInfo) -> Client {
        let nick_state = NickState::new(server.nick.clone());
        Client(Rc::new(ClientState {
            server,
            queue: SendQueue::new(),
            dispatcher: Dispatcher::new(),
            nick_state,
            channels: Rc::new(RefCell::new(HashMap::new())),
            server_properties: Rc::new(RefCell::new(ServerProperties::new())),
            fold: ascii_fold,
            lifecycle: Cell::new(Lifecycle::Created),
            last_activity: Rc::new(Cell::new(Instant::now())),
            recv_buf: Rc::new(RefCell::new(Vec::new())),
            io_task: RefCell::new(None),
            io_give_back: RefCell::new(None),
            watchdog_task: RefCell::new(None),
            handoff_in_progress: Cell::new(false),
            stop_barrier: Barrier::new(),
            stop_cause: RefCell::new(None),
            stop_handlers: RefCell::new(Vec::new()),
        }))
    }

    /// Registers a callback run exactly once when the client stops, for any reason. Must be
    /// called before the client stops to take effect.
    pub fn add_stop_handler(&self, f: impl Fn(&Client) + 'static) {
        self.0.stop_handlers.borrow_mut().push(Box::new(f));
    }

    /// Connects, runs the registration handshake (PASS/NICK/USER, then waits for RPL_WELCOME or
    /// RPL_NICKNAMEINUSE), installs the permanent nick/channel/ISUPPORT handlers, and starts the
    /// read/write loop and idle watchdog. Returns once registration has completed.
    pub async fn start(&self) -> Result<(), ClientError> {
        match self.0.lifecycle.get() {
            Lifecycle::Created => {}
            Lifecycle::Stopped => {
                return Err(ClientError::UsageError("client already stopped".to_owned()))
            }
            _ => return Err(ClientError::UsageError("client already started".to_owned())),
        }
        self.0.lifecycle.set(Lifecycle::Started);

        let stream = stream::connect(&self.0.server.host, self.0.server.port)
            .await
            .map_err(ClientError::Io)?;

        self.0.queue.set_cap(Some(queue::PRIO_REGISTRATION));

        if let Some(password) = &self.0.server.password {
            let _ = self
                .0
                .queue
                .push(queue::PRIO_REGISTRATION, Command::pass(password));
        }
        let _ = self
            .0
            .queue
            .push(queue::PRIO_REGISTRATION, Command::nick(&self.0.server.nick));
        let _ = self.0.queue.push(
            queue::PRIO_REGISTRATION,
            Command::user(
                self.0
                    .server
                    .ident
                    .as_deref()
                    .unwrap_or(&self.0.server.nick),
                self.0
                    .server
                    .real_name
                    .as_deref()
                    .unwrap_or(&self.0.server.nick),
            ),
        );

        let (welcome_tx, welcome_rx) = oneshot::channel();
        let welcome_tx = Rc::new(RefCell::new(Some(welcome_tx)));

        let welcome_nick_state = self.0.nick_state.clone();
        let welcome_id = self.0.dispatcher.next_id();
        let welcome_handler = HandlerBuilder::new("registration:WELCOME")
            .on(MatchSpec::new().command(MatchValue::exact("001")))
            .sync(true)
            .build(welcome_id, move |msg| {
                let welcome_tx = welcome_tx.clone();
                let nick_state = welcome_nick_state.clone();
                async move {
                    if let Command::Numeric(_, params) = &msg.command {
                        if let Some(accepted) = params.first() {
                            nick_state.force_current(accepted);
                        }
                    }
                    if let Some(tx) = welcome_tx.borrow_mut().take() {
                        let _ = tx.send(());
                    }
                    HandlerOutcome::Unregister
                }
            });
        self.0.dispatcher.insert(welcome_handler);

        let collision_queue = self.0.queue.clone();
        let collision_state = self.0.nick_state.clone();
        let collision_id = self.0.dispatcher.next_id();
        let collision_handler = HandlerBuilder::new("registration:NICKNAMEINUSE")
            .on(MatchSpec::new().command(MatchValue::exact("433")))
            .sync(true)
            .build(collision_id, move |msg| {
                let collision_queue = collision_queue.clone();
                let collision_state = collision_state.clone();
                async move {
                    if let Command::Numeric(_, params) = &msg.command {
                        if let Some(rejected) = params.get(1) {
                            let incremented = nick::increment_nick(rejected);
                            collision_state.force_current(&incremented);
                            let _ = collision_queue
                                .push(queue::PRIO_REGISTRATION, Command::nick(&incremented));
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        self.0.dispatcher.insert(collision_handler);

        let (give_back_tx, give_back_rx) = oneshot::channel();
        let io_client = self.clone();
        let io_task = tokio::task::spawn_local(io_loop(io_client, stream, give_back_tx));
        *self.0.io_task.borrow_mut() = Some(io_task);
        *self.0.io_give_back.borrow_mut() = Some(give_back_rx);

        let welcome_result = tokio::time::timeout(REGISTRATION_TIMEOUT, welcome_rx).await;

        self.0.dispatcher.unregister(welcome_id);
        self.0.dispatcher.unregister(collision_id);

        if !matches!(welcome_result, Ok(Ok(()))) {
            self.stop_inner(Some(ClientError::RegistrationTimeout));
            return Err(ClientError::RegistrationTimeout);
        }

        self.0.queue.set_cap(None);
        self.install_permanent_handlers();
        self.spawn_watchdog();

        self.0.lifecycle.set(Lifecycle::Running);
        Ok(())
    }

    fn install_permanent_handlers(&self) {
        nick::install_default_handlers(
            &self.0.dispatcher,
            self.0.nick_state.clone(),
            self.0.queue.clone(),
        );
        channel::install_default_handlers(
            &self.0.dispatcher,
            self.0.queue.clone(),
            self.0.channels.clone(),
            self.0.server_properties.clone(),
            self.0.nick_state.clone(),
            self.0.fold,
        );
        install_isupport_handler(&self.0.dispatcher, self.0.server_properties.clone());
        install_auto_pong_handler(&self.0.dispatcher, self.0.queue.clone());
    }

    fn spawn_watchdog(&self) {
        let watchdog_client = self.clone();
        let watchdog_task = tokio::task::spawn_local(watchdog_loop(watchdog_client));
        *self.0.watchdog_task.borrow_mut() = Some(watchdog_task);
    }

    /// Enqueues `command` at `priority`. Rejected (without touching the wire) if the client has
    /// started hand-off, or if `priority` is over the current admission cap (registration,
    /// hand-off drain).
    pub fn send(&self, command: Command, priority: i32) -> Result<(), ClientError> {
        self.0.queue.push(priority, command).map_err(|e| match e {
            PushError::Closed => ClientError::HandoffInProgress,
            PushError::OverCap { priority, cap } => ClientError::UsageError(format!(
                "send rejected: priority {} exceeds current admission cap {}",
                priority, cap
            )),
        })
    }

    /// `send` at [`PRIO_DEFAULT`], the priority for ordinary user-initiated traffic.
    pub fn send_default(&self, command: Command) -> Result<(), ClientError> {
        self.send(command, queue::PRIO_DEFAULT)
    }

    /// PRIVMSG `content` to `target`, splitting across multiple lines if it would otherwise
    /// overflow the 512-byte wire limit.
    pub fn msg(&self, target: &str, content: &str) -> Result<(), ClientError> {
        let max = 512usize.saturating_sub(target.len() + 12).max(1);
        for chunk in utils::split_iterator(content, max) {
            let cmd = Command::privmsg(target, chunk)
                .map_err(|e| ClientError::UsageError(e.to_string()))?;
            self.send(cmd, queue::PRIO_DEFAULT)?;
        }
        Ok(())
    }

    pub fn quit(&self, message: Option<&str>) -> Result<(), ClientError> {
        self.send(
            Command::quit(message.map(|s| s.to_owned())),
            queue::PRIO_CONTROL,
        )
    }

    /// Registers a handler built from `builder` plus its callback; returns an id usable with
    /// [`Client::unregister`]. Build a [`HandlerBuilder`] with `.on(...)` and the optional
    /// `.before(...)`/`.after(...)`/`.sync(...)` calls, then hand it here with the callback.
    pub fn register<F, Fut>(&self, builder: HandlerBuilder, callback: F) -> HandlerId
    where
        F: Fn(Message) -> Fut + 'static,
        Fut: Future<Output = HandlerOutcome> + 'static,
    {
        let id = self.0.dispatcher.next_id();
        self.0.dispatcher.insert(builder.build(id, callback));
        id
    }

    pub fn unregister(&self, id: HandlerId) {
        self.0.dispatcher.unregister(id);
    }

    /// Get-or-create the named channel's handle. Errors on an empty name; everything else
    /// (malformed w.r.t. the server's CHANTYPES, not yet joined, etc.) is left to the caller.
    pub fn channel(&self, name: &str) -> Result<Rc<Channel>, ClientError> {
        if name.is_empty() {
            return Err(ClientError::UsageError(
                "channel name must not be empty".to_owned(),
            ));
        }
        Ok(channel::get_or_insert(
            &self.0.channels,
            ChanNameRef::new(name),
            &self.0.queue,
            self.0.fold,
        ))
    }

    /// The current nick. Blocks for the duration of any in-flight nick change.
    pub async fn nick(&self) -> String {
        self.0.nick_state.current().await
    }

    /// Non-blocking: true if `v` is this client's current nick, or the one a change is pending
    /// to. The recommended way to recognize messages addressed to or about this client.
    pub fn matches_nick(&self, v: &str) -> bool {
        self.0.nick_state.matches_nick(v)
    }

    /// Changes nick: send `NICK`, wait for the server to process it (a PING/PONG round trip at
    /// [`PRIO_CONTROL`]), then commit whatever `pending` ended up holding — which may differ from
    /// `new_nick` on a NICKNAMEINUSE collision or a forced rename racing the change.
    pub async fn set_nick(&self, new_nick: &str) -> Result<(), ClientError> {
        let dispatcher = self.0.dispatcher.clone();
        let queue = self.0.queue.clone();
        nick::set_nick(&self.0.nick_state, &self.0.queue, new_nick, move |priority| {
            let dispatcher = dispatcher.clone();
            let queue = queue.clone();
            async move {
                pinger::wait_for_messages(
                    &dispatcher,
                    &queue,
                    priority,
                    pinger::WAIT_FOR_MESSAGES_TIMEOUT,
                )
                .await
            }
        })
        .await
    }

    /// Resolves with the next inbound message matching `spec`. One-shot: the underlying handler
    /// unregisters itself as soon as it fires.
    pub async fn wait_for(&self, spec: MatchSpec) -> Message {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));
        let id = self.0.dispatcher.next_id();
        let handler = HandlerBuilder::new("client:wait_for")
            .on(spec)
            .sync(true)
            .build(id, move |msg| {
                let tx = tx.clone();
                async move {
                    if let Some(tx) = tx.borrow_mut().take() {
                        let _ = tx.send(msg);
                    }
                    HandlerOutcome::Unregister
                }
            });
        self.0.dispatcher.insert(handler);
        rx.await.expect("wait_for's handler dropped without firing")
    }

    /// Stops the client. Idempotent: a second call (or a concurrent failure from the read/write
    /// loop or idle watchdog) is a no-op. `cause` is surfaced to [`Client::wait_for_stop`] callers
    /// wrapped as a [`ClientError::UsageError`]; pass `None` for a clean, caller-initiated stop.
    pub fn stop(&self, cause: Option<String>) {
        self.stop_inner(cause.map(ClientError::UsageError));
    }

    /// Resolves once the client has stopped, for any reason. `Ok(())` for a clean stop (an
    /// explicit `stop(None)` or a clean QUIT handshake); `Err` otherwise.
    pub async fn wait_for_stop(&self) -> Result<(), Rc<ClientError>> {
        self.0.stop_barrier.wait().await;
        match self.0.stop_cause.borrow().clone() {
            None => Ok(()),
            Some(cause) => Err(cause),
        }
    }

    fn stop_inner(&self, cause: Option<ClientError>) {
        if self.0.lifecycle.get() == Lifecycle::Stopped {
            return;
        }
        self.0.lifecycle.set(Lifecycle::Stopping);

        if let Some(handle) = self.0.io_task.borrow_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.0.watchdog_task.borrow_mut().take() {
            handle.abort();
        }
        self.0.io_give_back.borrow_mut().take();
        self.0.queue.close();
        self.0.dispatcher.clear();
        self.0.channels.borrow_mut().clear();

        *self.0.stop_cause.borrow_mut() = cause.map(Rc::new);
        self.0.lifecycle.set(Lifecycle::Stopped);
        self.0.stop_barrier.complete();

        for handler in self.0.stop_handlers.borrow().iter() {
            handler(self);
        }
    }

    /// Transfers the live connection to whoever is listening on `socket`: holds the nick lock
    /// forever (no more nick changes on this side), kills the idle watchdog, stops admitting new
    /// sends, waits for the send queue to drain, then hands the raw socket and a JSON resumption
    /// blob across as `SCM_RIGHTS` ancillary data. Ends by stopping this client cleanly; the
    /// receiving process owns the connection from here on.
    pub async fn handoff_to_socket(&self, socket: &UnixStream) -> Result<(), ClientError> {
        if self.0.lifecycle.get() != Lifecycle::Running {
            return Err(ClientError::UsageError(
                "hand-off requires a running client".to_owned(),
            ));
        }

        let guard = self.0.nick_state.acquire_lock().await;
        std::mem::forget(guard);

        if let Some(handle) = self.0.watchdog_task.borrow_mut().take() {
            handle.abort();
        }

        self.0.handoff_in_progress.set(true);
        self.0.queue.close();

        let give_back = self.0.io_give_back.borrow_mut().take().ok_or_else(|| {
            ClientError::UsageError("hand-off already in progress".to_owned())
        })?;
        let conn = give_back.await.map_err(|_| {
            ClientError::ConnectionClosed(
                "io loop dropped before handing back the socket".to_owned(),
            )
        })?;

        let joined_channels: Vec<String> = self
            .0
            .channels
            .borrow()
            .values()
            .filter(|c| c.is_joined())
            .map(|c| c.name().display().to_owned())
            .collect();

        let state = handoff::ResumeState::new(
            &self.0.recv_buf.borrow(),
            joined_channels,
            self.0.server.host.clone(),
            self.0.nick_state.peek_current(),
            self.0.server.port,
            self.0.server.password.clone(),
            self.0.server.ident.clone().unwrap_or_default(),
            self.0.server.real_name.clone().unwrap_or_default(),
        );

        handoff::send_fd_and_state(socket, conn, &state).await?;

        self.stop_inner(None);
        Ok(())
    }

    /// Receives a connection handed off by another process via [`Client::handoff_to_socket`],
    /// reconstructs a running client around it without repeating the registration handshake, and
    /// re-establishes each previously joined channel: marked joined immediately, with a fresh
    /// NAMES issued to repopulate its user list.
    pub async fn from_socket_handoff(socket: &UnixStream) -> Result<Client, ClientError> {
        let (conn, state) = handoff::recv_fd_and_state(socket).await?;

        let server = ServerInfo {
            host: state.hostname.clone(),
            port: state.port,
            nick: state.nick.clone(),
            password: state.password.clone(),
            ident: Some(state.ident.clone()),
            real_name: Some(state.real_name.clone()),
            nickserv_password: None,
        };
        let client = Client::open(server);
        client.0.lifecycle.set(Lifecycle::Started);
        *client.0.recv_buf.borrow_mut() = state.decode_recv_buf()?;
        client.0.nick_state.force_current(&state.nick);

        client.install_permanent_handlers();

        for chan_name in &state.channels {
            let chan = channel::get_or_insert(
                &client.0.channels,
                ChanNameRef::new(chan_name),
                &client.0.queue,
                client.0.fold,
            );
            chan.mark_resumed(&client.0.server_properties.borrow());
            let _ = client.0.queue.push(
                queue::PRIO_DEFAULT,
                Command::Other("NAMES".to_owned(), vec![chan_name.clone()]),
            );
        }

        let (give_back_tx, give_back_rx) = oneshot::channel();
        let io_client = client.clone();
        let io_task = tokio::task::spawn_local(io_loop(io_client, conn, give_back_tx));
        *client.0.io_task.borrow_mut() = Some(io_task);
        *client.0.io_give_back.borrow_mut() = Some(give_back_rx);

        client.spawn_watchdog();
        client.0.lifecycle.set(Lifecycle::Running);
        Ok(client)
    }
}

fn install_isupport_handler(
    dispatcher: &Dispatcher,
    server_properties: Rc<RefCell<ServerProperties>>,
) {
    let id = dispatcher.next_id();
    let handler = HandlerBuilder::new("client:ISUPPORT")
        .on(MatchSpec::new().command(MatchValue::exact("005")))
        .sync(true)
        .build(id, move |msg| {
            let server_properties = server_properties.clone();
            async move {
                if let Command::Numeric(_, params) = &msg.command {
                    server_properties.borrow_mut().merge_isupport_params(params);
                }
                HandlerOutcome::Continue
            }
        });
    dispatcher.insert(handler);
}

/// Replies to every server PING with a matching PONG at [`PRIO_AUTO_PONG`] (`spec.md` §4.4's
/// priority table, §8 scenario 3). Installed once, alongside the other permanent handlers; the
/// quiescence probe's own PING/PONG round trip (`pinger::wait_for_messages`) is unrelated — that
/// one originates from us and is matched by a private one-shot handler, not this one.
fn install_auto_pong_handler(dispatcher: &Dispatcher, queue: SendQueue) {
    let id = dispatcher.next_id();
    let handler = HandlerBuilder::new("client:auto-PONG")
        .on(MatchSpec::new().command(MatchValue::exact("PING")))
        .sync(true)
        .build(id, move |msg| {
            let queue = queue.clone();
            async move {
                if let Command::Ping(token) = &msg.command {
                    let _ = queue.push(queue::PRIO_AUTO_PONG, Command::pong(token));
                }
                HandlerOutcome::Continue
            }
        });
    dispatcher.insert(handler);
}

/// Owns the live `TcpStream` for the lifetime of the connection: one `select!` loop between
/// reading inbound bytes (parsed and dispatched as complete lines arrive) and popping the send
/// queue. Exits on EOF, a write error, a successfully transmitted QUIT, or the send queue closing
/// (hand-off quiesce, or — if `handoff_in_progress` wasn't set by this client's own hand-off path
/// — an unexpected closure, treated as a connection failure). Always sends the stream back over
/// `give_back` when the queue-closed branch fires, so a hand-off in progress can retrieve it.
async fn io_loop(client: Client, mut stream: TcpStream, give_back: oneshot::Sender<TcpStream>) {
    let mut read_buf = [0u8; 4096];
    loop {
        tokio::select! {
            read_result = stream.read(&mut read_buf) => {
                match read_result {
                    Ok(0) => {
                        client.stop_inner(Some(ClientError::ConnectionClosed(
                            "connection closed by peer".to_owned(),
                        )));
                        return;
                    }
                    Ok(n) => {
                        client.0.last_activity.set(Instant::now());
                        client.0.recv_buf.borrow_mut().extend_from_slice(&read_buf[..n]);
                        loop {
                            let parsed = {
                                let mut buf = client.0.recv_buf.borrow_mut();
                                parse_irc_msg(&mut buf)
                            };
                            match parsed {
                                None => break,
                                Some(Ok(msg)) => client.0.dispatcher.dispatch(msg).await,
                                Some(Err(e)) => warn!("dropping unparseable line: {}", e),
                            }
                        }
                    }
                    Err(e) => {
                        client.stop_inner(Some(ClientError::Io(e)));
                        return;
                    }
                }
            }
            maybe_cmd = client.0.queue.pop_or_closed() => {
                match maybe_cmd {
                    Some(cmd) => {
                        let is_quit = matches!(cmd, Command::Quit(_));
                        if let Err(e) = stream.write_all(cmd.encode().as_bytes()).await {
                            client.stop_inner(Some(ClientError::ConnectionClosed(e.to_string())));
                            return;
                        }
                        client.0.last_activity.set(Instant::now());
                        if is_quit {
                            client.stop_inner(None);
                            return;
                        }
                    }
                    None => {
                        let _ = give_back.send(stream);
                        if !client.0.handoff_in_progress.get() {
                            client.stop_inner(Some(ClientError::ConnectionClosed(
                                "send queue closed unexpectedly".to_owned(),
                            )));
                        }
                        return;
                    }
                }
            }
        }
    }
}

async fn watchdog_loop(client: Client) {
    let cause = pinger::idle_watchdog(
        client.0.last_activity.clone(),
        client.0.dispatcher.clone(),
        client.0.queue.clone(),
    )
    .await;
    client.stop_inner(Some(cause));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_info() -> ServerInfo {
        ServerInfo {
            host: "irc.example.org".to_owned(),
            port: 6667,
            nick: "alice".to_owned(),
            password: None,
            ident: None,
            real_name: None,
            nickserv_password: None,
        }
    }

    #[test]
    fn open_starts_in_created_state_with_no_background_tasks() {
        let client = Client::open(server_info());
        assert_eq!(client.0.lifecycle.get(), Lifecycle::Created);
        assert!(client.0.io_task.borrow().is_none());
        assert!(client.0.watchdog_task.borrow().is_none());
    }

    #[tokio::test]
    async fn channel_lookup_is_stable_across_calls() {
        let client = Client::open(server_info());
        let a = client.channel("#rust").unwrap();
        let b = client.channel("#rust").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!a.is_joined());
    }

    #[test]
    fn empty_channel_name_is_rejected() {
        let client = Client::open(server_info());
        assert!(client.channel("").is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_fires_handlers_once() {
        let client = Client::open(server_info());
        let fired = Rc::new(Cell::new(0));
        let fired_clone = fired.clone();
        client.add_stop_handler(move |_| fired_clone.set(fired_clone.get() + 1));

        client.stop(None);
        client.stop(Some("ignored second cause".to_owned()));

        assert_eq!(fired.get(), 1);
        assert!(client.wait_for_stop().await.is_ok());
    }

    #[tokio::test]
    async fn stop_with_cause_surfaces_as_error() {
        let client = Client::open(server_info());
        client.stop(Some("socket reset".to_owned()));
        let result = client.wait_for_stop().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn auto_pong_handler_replies_to_server_ping() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dispatcher = Dispatcher::new();
                let queue = SendQueue::new();
                install_auto_pong_handler(&dispatcher, queue.clone());

                // Queue a lower-priority message first; the auto-PONG reply must still come out
                // ahead of it, proving it really landed in the PRIO_AUTO_PONG bucket.
                queue.push(queue::PRIO_DEFAULT, Command::ping("unrelated")).unwrap();

                dispatcher
                    .dispatch(Message::new(Command::Ping("abc123".to_owned())))
                    .await;

                assert_eq!(queue.try_pop(), Some(Command::pong("abc123")));
                assert_eq!(queue.try_pop(), Some(Command::ping("unrelated")));
            })
            .await;
    }
}
