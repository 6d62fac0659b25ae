//! Channel & user-list (C8): per-channel rank-set membership, kept live by a handful of
//! permanent handlers installed once at [`install_default_handlers`] and dispatched through the
//! ordinary C6 path (NAMREPLY/ENDOFNAMES/JOIN/PART/KICK/QUIT/MODE/NICK), mirroring
//! `girc.Channel`/`girc.userlist.UserList` plus the teacher's simpler `libtiny_client::state`
//! `Chan { nicks: HashSet<String> }` tracker, generalized from one flat nick set to one set per
//! rank mode.
//!
//! Rather than registering a fresh batch of handlers per channel on every join (churning the
//! dispatcher's handler list), these handlers are global and look the target channel up in the
//! shared `channels` map by name. Observably this is the same thing the spec describes: each
//! channel still only reacts to messages that name it, and still gets a fresh `UserListView` and
//! a fresh "names ready" latch each time it's (re)joined.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use irc_common::{fold_str, CaseFold, ChanName, ChanNameRef};
use irc_wire::{command::parse_mode_changes, Command, ModeType, ServerProperties};

use crate::dispatch::{Barrier, Dispatcher};
use crate::handler::{HandlerBuilder, HandlerOutcome, MatchSpec, MatchValue};
use crate::nick::NickState;
use crate::queue::{SendQueue, PRIO_DEFAULT};

/// Sentinel mode for users with no rank (never appears in a server's PREFIX list).
pub const BASE_MODE: char = '\0';

/// Live view of a channel's membership, one `HashSet` of case-folded nicks per rank mode (plus
/// [`BASE_MODE`] for unranked members). `reset` is called once per (re)join; everything else is
/// fed incrementally by [`install_default_handlers`]'s callbacks.
pub struct UserListView {
    fold: CaseFold,
    /// Rank modes, most-to-least powerful, snapshotted from `ServerProperties::prefixes()` at
    /// the time the channel was (re)joined.
    ranks: RefCell<Vec<char>>,
    members: RefCell<HashMap<char, HashSet<String>>>,
}

impl UserListView {
    fn new(fold: CaseFold) -> Self {
        UserListView {
            fold,
            ranks: RefCell::new(Vec::new()),
            members: RefCell::new(HashMap::new()),
        }
    }

    fn reset(&self, ranks: Vec<char>) {
        *self.ranks.borrow_mut() = ranks;
        self.members.borrow_mut().clear();
    }

    fn rank(&self, mode: char) -> Option<usize> {
        self.ranks.borrow().iter().position(|m| *m == mode)
    }

    fn fold(&self, nick: &str) -> String {
        fold_str(nick, self.fold)
    }

    pub fn insert_base(&self, nick: &str) {
        let nick = self.fold(nick);
        self.members.borrow_mut().entry(BASE_MODE).or_default().insert(nick);
    }

    pub fn mode_add(&self, nick: &str, mode: char) {
        let nick = self.fold(nick);
        self.members.borrow_mut().entry(mode).or_default().insert(nick);
    }

    /// Removes `nick` from `mode`'s set and re-adds it at [`BASE_MODE`], per the documented edge
    /// case in `spec.md` §4.8: lesser modes can be lost this way; a NAMES refresh is the
    /// prescribed recovery.
    pub fn mode_remove(&self, nick: &str, mode: char) {
        let folded = self.fold(nick);
        if let Some(set) = self.members.borrow_mut().get_mut(&mode) {
            set.remove(&folded);
        }
        self.insert_base(nick);
    }

    pub fn remove_everywhere(&self, nick: &str) {
        let folded = self.fold(nick);
        for set in self.members.borrow_mut().values_mut() {
            set.remove(&folded);
        }
    }

    pub fn rename(&self, old: &str, new: &str) {
        let old_folded = self.fold(old);
        let new_folded = self.fold(new);
        for set in self.members.borrow_mut().values_mut() {
            if set.remove(&old_folded) {
                set.insert(new_folded.clone());
            }
        }
    }

    /// All users at `mode` or any ranked-higher mode. `mode` not being a known rank (e.g. an
    /// unrecognized letter) returns that mode's raw set, if any.
    pub fn at_or_above(&self, mode: char) -> HashSet<String> {
        match self.rank(mode) {
            None => self.members.borrow().get(&mode).cloned().unwrap_or_default(),
            Some(target_rank) => {
                let members = self.members.borrow();
                let mut result = HashSet::new();
                for (m, set) in members.iter() {
                    if self.rank(*m).map(|r| r <= target_rank).unwrap_or(false) {
                        result.extend(set.iter().cloned());
                    }
                }
                result
            }
        }
    }

    /// Users whose highest recorded rank is exactly `mode` (not any rank above it). Per the Open
    /// Question in `spec.md` §9/§4.8, a user the server only ever reported at a higher mode (the
    /// common NAMES case) will correctly not show up here; a user reported at `mode` *and* some
    /// higher mode (possible after incremental MODE changes) also correctly won't.
    pub fn only(&self, mode: char) -> HashSet<String> {
        let target_rank = match self.rank(mode) {
            Some(r) => r,
            None => return HashSet::new(),
        };
        let members = self.members.borrow();
        let Some(at_mode) = members.get(&mode) else {
            return HashSet::new();
        };
        at_mode
            .iter()
            .filter(|nick| {
                !members.iter().any(|(m, set)| {
                    self.rank(*m).map(|r| r < target_rank).unwrap_or(false) && set.contains(*nick)
                })
            })
            .cloned()
            .collect()
    }

    /// Complement of `at_or_above(mode)` within the channel's full membership.
    pub fn below(&self, mode: char) -> HashSet<String> {
        let above = self.at_or_above(mode);
        self.all_users().difference(&above).cloned().collect()
    }

    pub fn all_users(&self) -> HashSet<String> {
        let mut result = HashSet::new();
        for set in self.members.borrow().values() {
            result.extend(set.iter().cloned());
        }
        result
    }

    /// The user's highest recorded rank mode, or `None` if not present in the channel at all.
    pub fn level(&self, nick: &str) -> Option<char> {
        let folded = self.fold(nick);
        let members = self.members.borrow();
        let mut best: Option<(usize, char)> = None;
        for (mode, set) in members.iter() {
            if !set.contains(&folded) {
                continue;
            }
            let rank = self.rank(*mode).unwrap_or(usize::MAX);
            if best.map(|(br, _)| rank < br).unwrap_or(true) {
                best = Some((rank, *mode));
            }
        }
        best.map(|(_, m)| m)
    }
}

/// A joined-or-not channel: its membership view and the "NAMES list complete" latch.
pub struct Channel {
    name: ChanName,
    queue: SendQueue,
    joined: Cell<bool>,
    pub users: UserListView,
    names_ready: RefCell<Barrier>,
}

impl Channel {
    fn new(name: ChanName, queue: SendQueue, fold: CaseFold) -> Self {
        Channel {
            name,
            queue,
            joined: Cell::new(false),
            users: UserListView::new(fold),
            names_ready: RefCell::new(Barrier::new()),
        }
    }

    pub fn name(&self) -> &ChanNameRef {
        &self.name
    }

    pub fn is_joined(&self) -> bool {
        self.joined.get()
    }

    /// Blocks until the server's ENDOFNAMES reply for the current join has been seen.
    pub async fn wait_until_users_ready(&self) {
        self.names_ready.borrow().clone().wait().await
    }

    fn mark_joined(&self, ranks: Vec<char>) {
        self.joined.set(true);
        self.users.reset(ranks);
        *self.names_ready.borrow_mut() = Barrier::new();
    }

    fn mark_unjoined(&self) {
        self.joined.set(false);
    }

    fn complete_names(&self) {
        self.names_ready.borrow().complete();
    }

    pub fn join(&self) {
        let _ = self.queue.push(PRIO_DEFAULT, Command::join([&self.name]));
    }

    pub fn part(&self, reason: Option<String>) {
        let _ = self.queue.push(PRIO_DEFAULT, Command::part(self.name.clone(), reason));
    }

    /// Marks the channel joined without sending JOIN, for hand-off resume (`spec.md` §4.10
    /// Receive): the new process already has the server's view of the channel from the old
    /// process's memory, it just needs a fresh NAMES to repopulate the user list.
    pub fn mark_resumed(&self, props: &ServerProperties) {
        self.mark_joined(rank_modes(props));
    }
}

fn rank_modes(props: &ServerProperties) -> Vec<char> {
    props.prefixes().into_iter().map(|(mode, _)| mode).collect()
}

fn prefix_char_to_mode(props: &ServerProperties) -> HashMap<char, char> {
    props.prefixes().into_iter().map(|(mode, ch)| (ch, mode)).collect()
}

/// Split a NAMES token into its rank-mode prefix characters and the bare nick, e.g. `@+dave` with
/// `PREFIX=(ov)@+` yields `(['o', 'v'], "dave")`.
fn strip_name_prefixes<'a>(token: &'a str, prefix_to_mode: &HashMap<char, char>) -> (Vec<char>, &'a str) {
    let mut modes = Vec::new();
    let mut rest = token;
    while let Some(c) = rest.chars().next() {
        match prefix_to_mode.get(&c) {
            Some(mode) => {
                modes.push(*mode);
                rest = &rest[c.len_utf8()..];
            }
            None => break,
        }
    }
    (modes, rest)
}

type Channels = Rc<RefCell<HashMap<ChanName, Rc<Channel>>>>;

/// Get-or-create a `Channel` in the shared map.
pub fn get_or_insert(channels: &Channels, name: &ChanNameRef, queue: &SendQueue, fold: CaseFold) -> Rc<Channel> {
    if let Some(chan) = channels.borrow().get(name) {
        return chan.clone();
    }
    let chan = Rc::new(Channel::new(name.to_owned(), queue.clone(), fold));
    channels.borrow_mut().insert(name.to_owned(), chan.clone());
    chan
}

/// Registers the permanent handlers that keep every channel's `UserListView` in sync:
/// NAMREPLY/ENDOFNAMES build membership; JOIN/PART/KICK/QUIT/MODE/NICK update it incrementally.
/// Installed once, for the lifetime of the connection, mirroring [`crate::nick::install_default_handlers`].
pub fn install_default_handlers(
    dispatcher: &Dispatcher,
    queue: SendQueue,
    channels: Channels,
    server_properties: Rc<RefCell<ServerProperties>>,
    nick_state: Rc<NickState>,
    fold: CaseFold,
) {
    // NAMREPLY (353): "<client> <symbol> <channel> :<names...>"
    {
        let channels = channels.clone();
        let server_properties = server_properties.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:NAMREPLY")
            .on(MatchSpec::new().command(MatchValue::exact("353")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                let server_properties = server_properties.clone();
                async move {
                    if let Command::Numeric(_, params) = &msg.command {
                        if params.len() >= 3 {
                            let chan_name = ChanNameRef::new(&params[2]);
                            if let Some(chan) = channels.borrow().get(chan_name).cloned() {
                                let prefix_to_mode = prefix_char_to_mode(&server_properties.borrow());
                                for token in params[3..].iter().flat_map(|p| p.split_whitespace()) {
                                    let (modes, nick) = strip_name_prefixes(token, &prefix_to_mode);
                                    if nick.is_empty() {
                                        continue;
                                    }
                                    if modes.is_empty() {
                                        chan.users.insert_base(nick);
                                    } else {
                                        for mode in modes {
                                            chan.users.mode_add(nick, mode);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // ENDOFNAMES (366): "<client> <channel> :End of /NAMES list."
    {
        let channels = channels.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:ENDOFNAMES")
            .on(MatchSpec::new().command(MatchValue::exact("366")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                async move {
                    if let Command::Numeric(_, params) = &msg.command {
                        if let Some(chan_str) = params.get(1) {
                            let chan_name = ChanNameRef::new(chan_str);
                            if let Some(chan) = channels.borrow().get(chan_name).cloned() {
                                chan.complete_names();
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // JOIN
    {
        let channels = channels.clone();
        let server_properties = server_properties.clone();
        let nick_state = nick_state.clone();
        let queue = queue.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:JOIN")
            .on(MatchSpec::new().command(MatchValue::exact("JOIN")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                let server_properties = server_properties.clone();
                let nick_state = nick_state.clone();
                let queue = queue.clone();
                async move {
                    if let Command::Join(chans) = &msg.command {
                        let sender = msg.pfx.as_ref().and_then(|p| p.nick());
                        if let Some(sender) = sender {
                            let is_self = nick_state.matches_nick(sender);
                            for chan_name in chans {
                                if is_self {
                                    let chan = get_or_insert(&channels, chan_name, &queue, fold);
                                    chan.mark_joined(rank_modes(&server_properties.borrow()));
                                } else if let Some(chan) = channels.borrow().get(chan_name.as_ref()).cloned() {
                                    if chan.is_joined() {
                                        chan.users.insert_base(sender);
                                    }
                                }
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // PART
    {
        let channels = channels.clone();
        let nick_state = nick_state.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:PART")
            .on(MatchSpec::new().command(MatchValue::exact("PART")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                let nick_state = nick_state.clone();
                async move {
                    if let Command::Part(chan_name, _reason) = &msg.command {
                        let sender = msg.pfx.as_ref().and_then(|p| p.nick());
                        if let Some(sender) = sender {
                            if let Some(chan) = channels.borrow().get(chan_name.as_ref()).cloned() {
                                if nick_state.matches_nick(sender) {
                                    chan.mark_unjoined();
                                } else {
                                    chan.users.remove_everywhere(sender);
                                }
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // KICK
    {
        let channels = channels.clone();
        let nick_state = nick_state.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:KICK")
            .on(MatchSpec::new().command(MatchValue::exact("KICK")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                let nick_state = nick_state.clone();
                async move {
                    if let Command::Kick { chan, nick, .. } = &msg.command {
                        if let Some(channel) = channels.borrow().get(chan.as_ref()).cloned() {
                            if nick_state.matches_nick(nick) {
                                channel.mark_unjoined();
                            } else {
                                channel.users.remove_everywhere(nick);
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // QUIT (any channel this user was in)
    {
        let channels = channels.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:QUIT")
            .on(MatchSpec::new().command(MatchValue::exact("QUIT")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                async move {
                    if matches!(msg.command, Command::Quit(_)) {
                        if let Some(sender) = msg.pfx.as_ref().and_then(|p| p.nick()) {
                            for chan in channels.borrow().values() {
                                chan.users.remove_everywhere(sender);
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // MODE (target = a tracked channel)
    {
        let channels = channels.clone();
        let server_properties = server_properties.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:MODE")
            .on(MatchSpec::new().command(MatchValue::exact("MODE")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                let server_properties = server_properties.clone();
                async move {
                    if let Command::Mode {
                        target,
                        modestring,
                        args,
                    } = &msg.command
                    {
                        let chan_name = ChanNameRef::new(target);
                        if let Some(chan) = channels.borrow().get(chan_name).cloned() {
                            let props = server_properties.borrow();
                            let rank_letters: HashSet<char> = props.prefixes().into_iter().map(|(m, _)| m).collect();
                            let takes_arg = |letter: char, adding: bool| match props.mode_type(letter) {
                                Some(ModeType::List) | Some(ModeType::ParamUnset) => true,
                                Some(ModeType::Param) => adding,
                                Some(ModeType::NoParam) | None => false,
                            };
                            let arg_strs: Vec<&str> = args.iter().map(String::as_str).collect();
                            if let Ok(changes) = parse_mode_changes(modestring, &arg_strs, takes_arg) {
                                for change in changes {
                                    if !rank_letters.contains(&change.letter) {
                                        continue;
                                    }
                                    if let Some(arg) = &change.arg {
                                        if change.adding {
                                            chan.users.mode_add(arg, change.letter);
                                        } else {
                                            chan.users.mode_remove(arg, change.letter);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }

    // NICK (rename across every channel that has the old nick)
    {
        let channels = channels.clone();
        let id = dispatcher.next_id();
        let h = HandlerBuilder::new("channel:NICK")
            .on(MatchSpec::new().command(MatchValue::exact("NICK")))
            .sync(true)
            .build(id, move |msg| {
                let channels = channels.clone();
                async move {
                    if let Command::Nick(new) = &msg.command {
                        if let Some(old) = msg.pfx.as_ref().and_then(|p| p.nick()) {
                            for chan in channels.borrow().values() {
                                chan.users.rename(old, new);
                            }
                        }
                    }
                    HandlerOutcome::Continue
                }
            });
        dispatcher.insert(h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irc_common::ascii_fold;

    fn view() -> UserListView {
        let v = UserListView::new(ascii_fold);
        v.reset(vec!['o', 'v']);
        v
    }

    #[test]
    fn names_build_and_derived_views() {
        let v = view();
        v.mode_add("bob", 'o');
        v.mode_add("dave", 'v');
        v.insert_base("eve");

        assert_eq!(v.at_or_above('o'), HashSet::from(["bob".to_owned()]));
        assert_eq!(
            v.at_or_above('v'),
            HashSet::from(["bob".to_owned(), "dave".to_owned()])
        );
        assert_eq!(
            v.all_users(),
            HashSet::from(["bob".to_owned(), "dave".to_owned(), "eve".to_owned()])
        );
        assert_eq!(v.only('o'), HashSet::from(["bob".to_owned()]));
        assert_eq!(v.only('v'), HashSet::from(["dave".to_owned()]));
    }

    #[test]
    fn mode_inclusion_invariant() {
        let v = view();
        v.mode_add("bob", 'o');
        v.mode_add("dave", 'v');
        let only_v = v.only('v');
        let at_or_above_v = v.at_or_above('v');
        assert!(only_v.is_subset(&at_or_above_v));
        let at_or_above_o = v.at_or_above('o');
        assert!(at_or_above_o.is_subset(&at_or_above_v));
    }

    #[test]
    fn case_folded_exclusivity() {
        let v = view();
        v.insert_base("Bob");
        v.insert_base("BOB");
        assert_eq!(v.all_users().len(), 1);
    }

    #[test]
    fn mode_remove_keeps_presence_at_base() {
        let v = view();
        v.mode_add("bob", 'o');
        v.mode_remove("bob", 'o');
        // demoted to BASE_MODE, not dropped from the channel entirely
        assert_eq!(v.level("bob"), Some(BASE_MODE));
        assert!(v.all_users().contains("bob"));
    }

    #[test]
    fn rename_moves_user_in_every_mode_set() {
        let v = view();
        v.mode_add("bob", 'o');
        v.insert_base("bob");
        v.rename("bob", "bobby");
        assert!(v.level("bobby") == Some('o'));
        assert!(!v.all_users().contains("bob"));
    }

    #[test]
    fn strip_prefixes_handles_stacked_chars() {
        let mut map = HashMap::new();
        map.insert('@', 'o');
        map.insert('+', 'v');
        let (modes, nick) = strip_name_prefixes("@+dave", &map);
        assert_eq!(modes, vec!['o', 'v']);
        assert_eq!(nick, "dave");
    }
}
