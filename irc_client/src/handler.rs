//! Handler & Matcher (C5): the value-matcher algebra, match specs, and the `Handler` record
//! (match specs + callback + partial-order metadata). Ported from the `Handler`/`BoundHandler`
//! split in the Python original this crate's behavior is drawn from; in idiomatic Rust the
//! "bound handler" role is filled by an ordinary closure capturing an `Rc<RefCell<_>>` receiver,
//! so there's no separate `BoundHandler` type here.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use regex::Regex;

use irc_wire::Message;

/// A value matcher over a single string field (sender, user, host, a command token, or one
/// parameter). `Any` matches everything; the rest match exactly one of their cases.
#[derive(Clone)]
pub enum MatchValue {
    Any,
    Exact(String),
    Regex(Regex),
    Pred(Rc<dyn Fn(&str) -> bool>),
    AnyOf(Vec<MatchValue>),
}

impl fmt::Debug for MatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchValue::Any => write!(f, "Any"),
            MatchValue::Exact(s) => write!(f, "Exact({:?})", s),
            MatchValue::Regex(r) => write!(f, "Regex({})", r.as_str()),
            MatchValue::Pred(_) => write!(f, "Pred(..)"),
            MatchValue::AnyOf(vs) => write!(f, "AnyOf({:?})", vs),
        }
    }
}

impl MatchValue {
    /// Case-sensitive exact match, except through [`MatchValue::command`] which upcases first.
    pub fn exact(s: impl Into<String>) -> MatchValue {
        MatchValue::Exact(s.into())
    }

    pub fn regex(re: Regex) -> MatchValue {
        MatchValue::Regex(re)
    }

    pub fn pred(f: impl Fn(&str) -> bool + 'static) -> MatchValue {
        MatchValue::Pred(Rc::new(f))
    }

    pub fn any_of(values: impl IntoIterator<Item = MatchValue>) -> MatchValue {
        MatchValue::AnyOf(values.into_iter().collect())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            MatchValue::Any => true,
            MatchValue::Exact(expected) => expected == value,
            MatchValue::Regex(re) => re.is_match(value),
            MatchValue::Pred(f) => f(value),
            MatchValue::AnyOf(values) => values.iter().any(|v| v.matches(value)),
        }
    }
}

/// Matches the full parameter list either positionally (each index either `Any` or a specific
/// matcher; the spec's shorter list matches a prefix) or via a whole-list predicate.
#[derive(Clone)]
pub enum ParamsMatch {
    Indexed(Vec<MatchValue>),
    Pred(Rc<dyn Fn(&[String]) -> bool>),
}

impl ParamsMatch {
    pub fn indexed(values: impl IntoIterator<Item = MatchValue>) -> ParamsMatch {
        ParamsMatch::Indexed(values.into_iter().collect())
    }

    pub fn pred(f: impl Fn(&[String]) -> bool + 'static) -> ParamsMatch {
        ParamsMatch::Pred(Rc::new(f))
    }

    fn matches(&self, params: &[String]) -> bool {
        match self {
            ParamsMatch::Indexed(values) => {
                if values.len() > params.len() {
                    return false;
                }
                values.iter().zip(params.iter()).all(|(m, p)| m.matches(p))
            }
            ParamsMatch::Pred(f) => f(params),
        }
    }
}

/// All of `command`/`sender`/`user`/`host`/`params` that are `Some` must match (logical AND);
/// fields left `None` are unconstrained.
#[derive(Clone, Default)]
pub struct MatchSpec {
    pub command: Option<MatchValue>,
    pub sender: Option<MatchValue>,
    pub user: Option<MatchValue>,
    pub host: Option<MatchValue>,
    pub params: Option<ParamsMatch>,
}

impl MatchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, m: MatchValue) -> Self {
        self.command = Some(m);
        self
    }

    pub fn sender(mut self, m: MatchValue) -> Self {
        self.sender = Some(m);
        self
    }

    pub fn user(mut self, m: MatchValue) -> Self {
        self.user = Some(m);
        self
    }

    pub fn host(mut self, m: MatchValue) -> Self {
        self.host = Some(m);
        self
    }

    pub fn params(mut self, m: ParamsMatch) -> Self {
        self.params = Some(m);
        self
    }

    pub fn matches(&self, msg: &Message) -> bool {
        if let Some(m) = &self.command {
            if !m.matches(&command_token(msg)) {
                return false;
            }
        }
        if self.sender.is_some() || self.user.is_some() || self.host.is_some() {
            let (sender, user, host) = prefix_parts(msg);
            if let Some(m) = &self.sender {
                if !sender.map(|s| m.matches(s)).unwrap_or(false) {
                    return false;
                }
            }
            if let Some(m) = &self.user {
                if !user.map(|u| m.matches(u)).unwrap_or(false) {
                    return false;
                }
            }
            if let Some(m) = &self.host {
                if !host.map(|h| m.matches(h)).unwrap_or(false) {
                    return false;
                }
            }
        }
        if let Some(m) = &self.params {
            if !m.matches(&message_params(msg)) {
                return false;
            }
        }
        true
    }
}

/// The command's match token: the uppercase command name, or the zero-padded three-digit
/// numeric, matching how a caller would write e.g. `MatchValue::exact("PRIVMSG")` or
/// `MatchValue::exact("433")`.
pub fn command_token(msg: &Message) -> String {
    use irc_wire::Command::*;
    match &msg.command {
        Pass(_) => "PASS".to_owned(),
        Nick(_) => "NICK".to_owned(),
        User { .. } => "USER".to_owned(),
        Quit(_) => "QUIT".to_owned(),
        Join(_) => "JOIN".to_owned(),
        Part(..) => "PART".to_owned(),
        Privmsg { is_notice, .. } => {
            if *is_notice {
                "NOTICE".to_owned()
            } else {
                "PRIVMSG".to_owned()
            }
        }
        List(_) => "LIST".to_owned(),
        Kick { .. } => "KICK".to_owned(),
        Whois(_) => "WHOIS".to_owned(),
        Mode { .. } => "MODE".to_owned(),
        Ping(_) => "PING".to_owned(),
        Pong(_) => "PONG".to_owned(),
        Error(_) => "ERROR".to_owned(),
        Topic { .. } => "TOPIC".to_owned(),
        Away(_) => "AWAY".to_owned(),
        Cap { .. } => "CAP".to_owned(),
        Authenticate(_) => "AUTHENTICATE".to_owned(),
        Numeric(n, _) => format!("{:03}", n),
        Other(cmd, _) => cmd.to_uppercase(),
    }
}

fn prefix_parts(msg: &Message) -> (Option<&str>, Option<&str>, Option<&str>) {
    use irc_wire::Pfx;
    match &msg.pfx {
        None => (None, None, None),
        Some(Pfx::Server(name)) => (Some(name.as_str()), None, None),
        Some(Pfx::Ambiguous(name)) => (Some(name.as_str()), None, None),
        Some(Pfx::User { nick, user }) => {
            let (u, h) = user.split_once('@').unwrap_or((user.as_str(), ""));
            (Some(nick.as_str()), Some(u), Some(h))
        }
    }
}

/// Flattens a command's fields into the positional parameter list a `ParamsMatch` sees. This
/// mirrors what a caller would expect from the raw wire params for the command.
pub fn message_params(msg: &Message) -> Vec<String> {
    use irc_wire::Command::*;
    match &msg.command {
        Numeric(_, params) | Other(_, params) => params.clone(),
        Privmsg { target, text, .. } => vec![target.display().to_owned(), text.clone()],
        Join(chans) => chans.iter().map(|c| c.display().to_owned()).collect(),
        Part(chan, reason) => {
            let mut v = vec![chan.display().to_owned()];
            v.extend(reason.clone());
            v
        }
        Kick { chan, nick, reason } => {
            let mut v = vec![chan.display().to_owned(), nick.clone()];
            v.extend(reason.clone());
            v
        }
        Mode {
            target,
            modestring,
            args,
        } => {
            let mut v = vec![target.clone(), modestring.clone()];
            v.extend(args.clone());
            v
        }
        Nick(nick) => vec![nick.clone()],
        Quit(reason) => reason.iter().cloned().collect(),
        Pong(params) => params.clone(),
        Ping(s) | Whois(s) | Authenticate(s) | Error(s) => vec![s.clone()],
        Topic { chan, topic } => vec![chan.display().to_owned(), topic.clone()],
        Cap {
            subcommand, params, ..
        } => {
            let mut v = vec![subcommand.clone()];
            v.extend(params.clone());
            v
        }
        Away(msg) => msg.iter().cloned().collect(),
        List(chans) => chans.iter().map(|c| c.display().to_owned()).collect(),
        Pass(p) => vec![p.clone()],
        User { username, realname } => vec![username.clone(), realname.clone()],
    }
}

/// What a handler callback's completed future resolves to: whether the scheduler should
/// unregister the handler after this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Continue,
    Unregister,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerOutcome>>>;
pub type HandlerCallback = Rc<dyn Fn(Message) -> HandlerFuture>;

/// Opaque identity used to reference a handler from another handler's `before`/`after` sets.
pub type HandlerId = u64;

/// A dependency target: another handler, or the sentinel `sync` node the read loop blocks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dep {
    Handler(HandlerId),
    Sync,
}

/// A registered handler: one or more match specs (OR across specs), a callback, and partial-order
/// metadata consumed by the dispatch scheduler (C6).
pub struct Handler {
    pub id: HandlerId,
    /// For diagnostics: handler errors and dependency-cycle errors are logged with this.
    pub name: String,
    pub specs: Vec<MatchSpec>,
    pub before: Vec<Dep>,
    pub after: Vec<Dep>,
    pub callback: HandlerCallback,
    unregistered: Cell<bool>,
}

impl Handler {
    pub fn matches(&self, msg: &Message) -> bool {
        self.specs.iter().any(|spec| spec.matches(msg))
    }

    pub fn is_sync(&self) -> bool {
        self.before.contains(&Dep::Sync)
    }

    pub fn mark_unregistered(&self) {
        self.unregistered.set(true);
    }

    pub fn is_unregistered(&self) -> bool {
        self.unregistered.get()
    }
}

/// Builds a `Handler`. `sync(true)` is sugar for `before(Dep::Sync)`.
pub struct HandlerBuilder {
    name: String,
    specs: Vec<MatchSpec>,
    before: Vec<Dep>,
    after: Vec<Dep>,
}

impl HandlerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        HandlerBuilder {
            name: name.into(),
            specs: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn on(mut self, spec: MatchSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn before(mut self, dep: Dep) -> Self {
        self.before.push(dep);
        self
    }

    pub fn after(mut self, dep: Dep) -> Self {
        self.after.push(dep);
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        if sync {
            self.before.push(Dep::Sync);
        }
        self
    }

    pub fn build<F, Fut>(self, id: HandlerId, callback: F) -> Handler
    where
        F: Fn(Message) -> Fut + 'static,
        Fut: Future<Output = HandlerOutcome> + 'static,
    {
        Handler {
            id,
            name: self.name,
            specs: self.specs,
            before: self.before,
            after: self.after,
            callback: Rc::new(move |msg| Box::pin(callback(msg))),
            unregistered: Cell::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irc_wire::{Command, Message};

    #[test]
    fn exact_command_match() {
        let spec = MatchSpec::new().command(MatchValue::exact("PING"));
        let msg = Message::new(Command::Ping("abc123".to_owned()));
        assert!(spec.matches(&msg));

        let other = Message::new(Command::Pong(vec!["abc123".to_owned()]));
        assert!(!spec.matches(&other));
    }

    #[test]
    fn numeric_command_match() {
        let spec = MatchSpec::new().command(MatchValue::exact("433"));
        let msg = Message::new(Command::Numeric(433, vec!["*".to_owned(), "alice".to_owned()]));
        assert!(spec.matches(&msg));
    }

    #[test]
    fn params_predicate() {
        let spec = MatchSpec::new().params(ParamsMatch::pred(|params| {
            params.last().map(|s| s == "End of /NAMES list.").unwrap_or(false)
        }));
        let msg = Message::new(Command::Numeric(
            366,
            vec!["alice".to_owned(), "#chan".to_owned(), "End of /NAMES list.".to_owned()],
        ));
        assert!(spec.matches(&msg));
    }
}
