//! Typed commands: validating constructors for outgoing messages, and the shape incoming
//! messages parse into (see [`crate::message::Message::parse`]).

use irc_common::ChanName;

use crate::ctcp::{encode_ctcp, Ctcp};
use crate::error::{CommandError, ModeParseError};
use crate::message::MsgTarget;

/// One `+`/`-` mode edit, as found in a MODE message or built by a caller changing channel
/// modes. `arg` is `None` for `NoParam` modes and for unset `Param` modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub adding: bool,
    pub letter: char,
    pub arg: Option<String>,
}

impl ModeChange {
    pub fn encode(&self) -> (char, char) {
        (if self.adding { '+' } else { '-' }, self.letter)
    }
}

/// Decode a MODE message's `<modestring> <args...>` pair into a sequence of edits. `arg_for`
/// tells us, for a given mode letter and add/remove direction, whether that letter consumes one
/// of `args` — this is server- and mode-type dependent (a `+k` takes an arg, a `-k` doesn't on
/// some servers but does on others), so callers thread in `irc_wire::isupport::ServerProperties`
/// here rather than this module guessing.
pub fn parse_mode_changes(
    modestring: &str,
    args: &[&str],
    takes_arg: impl Fn(char, bool) -> bool,
) -> Result<Vec<ModeChange>, ModeParseError> {
    if modestring.is_empty() {
        return Err(ModeParseError::Empty);
    }

    let mut changes = Vec::new();
    let mut adding = match modestring.chars().next() {
        Some('+') => true,
        Some('-') => false,
        _ => return Err(ModeParseError::MissingSign(modestring.to_owned())),
    };

    let mut arg_idx = 0;
    for c in modestring.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            letter => {
                let arg = if takes_arg(letter, adding) {
                    let arg = args.get(arg_idx).ok_or_else(|| ModeParseError::NotEnoughArguments {
                        modestring: modestring.to_owned(),
                        needed: arg_idx + 1,
                        got: args.len(),
                    })?;
                    arg_idx += 1;
                    Some((*arg).to_owned())
                } else {
                    None
                };
                changes.push(ModeChange {
                    adding,
                    letter,
                    arg,
                });
            }
        }
    }

    Ok(changes)
}

/// Serialize mode changes back into `<modestring> <args...>` form.
pub fn encode_mode_changes(changes: &[ModeChange]) -> (String, Vec<String>) {
    let mut modestring = String::new();
    let mut args = Vec::new();
    let mut last_sign = None;
    for change in changes {
        let sign = if change.adding { '+' } else { '-' };
        if last_sign != Some(sign) {
            modestring.push(sign);
            last_sign = Some(sign);
        }
        modestring.push(change.letter);
        if let Some(arg) = &change.arg {
            args.push(arg.clone());
        }
    }
    (modestring, args)
}

/// An IRC command or reply, shared by outgoing (constructed by callers) and incoming (parsed off
/// the wire) messages.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    Pass(String),
    Nick(String),
    User {
        username: String,
        realname: String,
    },
    Quit(Option<String>),
    Join(Vec<ChanName>),
    Part(ChanName, Option<String>),
    /// A PRIVMSG or NOTICE; check `is_notice`.
    Privmsg {
        target: MsgTarget,
        text: String,
        is_notice: bool,
        ctcp: Option<Ctcp>,
    },
    List(Vec<ChanName>),
    Kick {
        chan: ChanName,
        nick: String,
        reason: Option<String>,
    },
    Whois(String),
    Mode {
        target: String,
        modestring: String,
        args: Vec<String>,
    },
    Ping(String),
    /// All params off the wire, in order (e.g. `[server, token]` for `PONG <server> :<token>`,
    /// or just `[token]`); the token a quiescence probe matches against can be in either
    /// position depending on the server, so nothing here picks one out as *the* param.
    Pong(Vec<String>),
    Error(String),
    Topic {
        chan: ChanName,
        topic: String,
    },
    Away(Option<String>),
    Cap {
        client: String,
        subcommand: String,
        params: Vec<String>,
    },
    Authenticate(String),
    /// Numeric reply (001–999).
    Numeric(u16, Vec<String>),
    /// Any other command this library doesn't have a typed variant for.
    Other(String, Vec<String>),
}

impl Command {
    pub fn pass(pass: &str) -> Command {
        Command::Pass(pass.to_owned())
    }

    pub fn nick(nick: &str) -> Command {
        Command::Nick(nick.to_owned())
    }

    pub fn user(username: &str, realname: &str) -> Command {
        Command::User {
            username: username.to_owned(),
            realname: realname.to_owned(),
        }
    }

    pub fn quit(reason: Option<String>) -> Command {
        Command::Quit(reason)
    }

    /// Builds a JOIN over the given channels, deduplicating (case-insensitively) and dropping
    /// channels already present earlier in the iterator.
    pub fn join<'a, I>(chans: I) -> Command
    where
        I: IntoIterator<Item = &'a ChanName>,
    {
        let mut seen: Vec<ChanName> = Vec::new();
        for chan in chans {
            if !seen.iter().any(|c| c == chan) {
                seen.push(chan.clone());
            }
        }
        Command::Join(seen)
    }

    pub fn part(chan: ChanName, reason: Option<String>) -> Command {
        Command::Part(chan, reason)
    }

    /// A PRIVMSG/NOTICE. Rejects payloads that would push the encoded line over the 512 byte
    /// RFC 1459/2812 limit; splitting a long message into several is the caller's job (see
    /// `irc_client::utils::split_privmsg`).
    pub fn privmsg(target: &str, text: &str) -> Result<Command, CommandError> {
        Self::privmsg_or_notice(target, text, false)
    }

    pub fn notice(target: &str, text: &str) -> Result<Command, CommandError> {
        Self::privmsg_or_notice(target, text, true)
    }

    fn privmsg_or_notice(target: &str, text: &str, is_notice: bool) -> Result<Command, CommandError> {
        // "PRIVMSG "/"NOTICE " + target + " :" + text + "\r\n", plus prefix slack.
        if target.len() + text.len() + 12 > 512 {
            return Err(CommandError::MessageTooLong {
                target: target.to_owned(),
                len: target.len() + text.len() + 12,
            });
        }
        Ok(Command::Privmsg {
            target: MsgTarget::parse(target),
            text: text.to_owned(),
            is_notice,
            ctcp: None,
        })
    }

    pub fn action(target: &str, text: &str) -> Result<Command, CommandError> {
        let ctcp_text = encode_ctcp("ACTION", Some(text));
        if target.len() + ctcp_text.len() + 12 > 512 {
            return Err(CommandError::MessageTooLong {
                target: target.to_owned(),
                len: target.len() + ctcp_text.len() + 12,
            });
        }
        Ok(Command::Privmsg {
            target: MsgTarget::parse(target),
            text: ctcp_text,
            is_notice: false,
            ctcp: Some(Ctcp::Action),
        })
    }

    pub fn away(msg: Option<&str>) -> Command {
        Command::Away(msg.map(|s| s.to_owned()))
    }

    pub fn cap_ls() -> Command {
        Command::Cap {
            client: "*".to_owned(),
            subcommand: "LS".to_owned(),
            params: Vec::new(),
        }
    }

    pub fn cap_req(cap_identifiers: &[&str]) -> Command {
        Command::Cap {
            client: "*".to_owned(),
            subcommand: "REQ".to_owned(),
            params: vec![cap_identifiers.join(" ")],
        }
    }

    pub fn cap_end() -> Command {
        Command::Cap {
            client: "*".to_owned(),
            subcommand: "END".to_owned(),
            params: Vec::new(),
        }
    }

    pub fn authenticate(msg: &str) -> Command {
        Command::Authenticate(msg.to_owned())
    }

    pub fn ping(arg: &str) -> Command {
        Command::Ping(arg.to_owned())
    }

    pub fn pong(token: &str) -> Command {
        Command::Pong(vec![token.to_owned()])
    }

    pub fn mode(target: &str, changes: &[ModeChange]) -> Command {
        let (modestring, args) = encode_mode_changes(changes);
        Command::Mode {
            target: target.to_owned(),
            modestring,
            args,
        }
    }

    /// Serialize to a wire line, including the trailing `\r\n`.
    pub fn encode(&self) -> String {
        match self {
            Command::Pass(pass) => format!("PASS {}\r\n", pass),
            Command::Nick(nick) => format!("NICK {}\r\n", nick),
            Command::User { username, realname } => {
                format!("USER {} 8 * :{}\r\n", username, realname)
            }
            Command::Quit(None) => "QUIT\r\n".to_owned(),
            Command::Quit(Some(reason)) => format!("QUIT :{}\r\n", reason),
            Command::Join(chans) => {
                let names: Vec<&str> = chans.iter().map(|c| c.display()).collect();
                format!("JOIN {}\r\n", names.join(","))
            }
            Command::Part(chan, None) => format!("PART {}\r\n", chan.display()),
            Command::Part(chan, Some(reason)) => {
                format!("PART {} :{}\r\n", chan.display(), reason)
            }
            Command::Privmsg {
                target,
                text,
                is_notice,
                ..
            } => {
                let verb = if *is_notice { "NOTICE" } else { "PRIVMSG" };
                format!("{} {} :{}\r\n", verb, target.display(), text)
            }
            Command::List(chans) => {
                if chans.is_empty() {
                    "LIST\r\n".to_owned()
                } else {
                    let names: Vec<&str> = chans.iter().map(|c| c.display()).collect();
                    format!("LIST {}\r\n", names.join(","))
                }
            }
            Command::Kick { chan, nick, reason } => match reason {
                None => format!("KICK {} {}\r\n", chan.display(), nick),
                Some(reason) => format!("KICK {} {} :{}\r\n", chan.display(), nick, reason),
            },
            Command::Whois(target) => format!("WHOIS {}\r\n", target),
            Command::Mode {
                target,
                modestring,
                args,
            } => {
                if args.is_empty() {
                    format!("MODE {} {}\r\n", target, modestring)
                } else {
                    format!("MODE {} {} {}\r\n", target, modestring, args.join(" "))
                }
            }
            Command::Ping(arg) => format!("PING {}\r\n", arg),
            Command::Pong(params) => format!("PONG {}\r\n", params.join(" ")),
            Command::Error(msg) => format!("ERROR :{}\r\n", msg),
            Command::Topic { chan, topic } => format!("TOPIC {} :{}\r\n", chan.display(), topic),
            Command::Away(None) => "AWAY\r\n".to_owned(),
            Command::Away(Some(msg)) => format!("AWAY :{}\r\n", msg),
            Command::Cap {
                subcommand, params, ..
            } => {
                if params.is_empty() {
                    format!("CAP {}\r\n", subcommand)
                } else {
                    format!("CAP {} :{}\r\n", subcommand, params.join(" "))
                }
            }
            Command::Authenticate(msg) => format!("AUTHENTICATE {}\r\n", msg),
            Command::Numeric(num, params) => format!("{:03} {}\r\n", num, params.join(" ")),
            Command::Other(cmd, params) => format!("{} {}\r\n", cmd, params.join(" ")),
        }
    }
}
