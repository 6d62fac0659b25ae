//! Line framing and the top-level `Message` type.

use irc_common::ChanName;

use crate::command::Command;
use crate::ctcp::split_ctcp;
use crate::error::MessageParseError;

/// Sender of a message ("prefix" in the RFC). We parse the prefix instead of handing back a bare
/// string because callers sometimes need to distinguish a server from a user (e.g. routing a
/// PRIVMSG from a server to a status view rather than a user tab).
///
/// The ambiguity acknowledged by the RFC makes this a best-effort thing: a prefix like `foo` with
/// no `!`, `@`, `.`, or nick-only characters could be either a server or a nick, and in that case
/// we return [`Pfx::Ambiguous`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Pfx {
    /// Sender is a server.
    Server(String),

    /// Sender is a nick.
    User {
        /// Nick of the sender.
        nick: String,
        /// `user@host` part.
        user: String,
    },

    /// Could be a server or a nick; see the type-level docs.
    Ambiguous(String),
}

impl Pfx {
    /// The nick, interpreting the ambiguous case as a nick. Used by nick-change matching, where
    /// a bare ambiguous prefix almost always is the acting nick.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Pfx::User { nick, .. } | Pfx::Ambiguous(nick) => Some(nick),
            Pfx::Server(_) => None,
        }
    }
}

// RFC 2812 section 2.3.1
fn parse_pfx(pfx: &str) -> Pfx {
    match pfx.find(['!', '@']) {
        Some(idx) => Pfx::User {
            nick: pfx[0..idx].to_owned(),
            user: pfx[idx + 1..].to_owned(),
        },
        None => {
            // Characters nicks can have but servernames cannot.
            if pfx.find(['[', ']', '\\', '`', '_', '^', '{', '|', '}']).is_some() {
                Pfx::User {
                    nick: pfx.to_owned(),
                    user: "".to_owned(),
                }
            } else if pfx.contains('.') {
                // Nicks can't have '.'.
                Pfx::Server(pfx.to_owned())
            } else {
                Pfx::Ambiguous(pfx.to_owned())
            }
        }
    }
}

/// Target of a message. Masks are not parsed (the rules for them are unclear in the RFC and
/// servers routinely send masks that aren't RFC-valid); a target starting with a channel-type
/// character is a `Chan`, everything else is a `User`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum MsgTarget {
    Chan(ChanName),
    User(String),
}

impl MsgTarget {
    /// Parse a target string using the default channel-type prefix (`#`). Callers that have a
    /// server's negotiated CHANTYPES should use [`MsgTarget::parse_with_chantypes`] instead.
    pub fn parse(target: &str) -> MsgTarget {
        Self::parse_with_chantypes(target, "#")
    }

    pub fn parse_with_chantypes(target: &str, chantypes: &str) -> MsgTarget {
        if target
            .chars()
            .next()
            .map(|c| chantypes.contains(c))
            .unwrap_or(false)
        {
            MsgTarget::Chan(ChanName::new(target.to_owned()))
        } else {
            MsgTarget::User(target.to_owned())
        }
    }

    pub fn display(&self) -> &str {
        match self {
            MsgTarget::Chan(chan) => chan.display(),
            MsgTarget::User(nick) => nick,
        }
    }
}

/// A parsed (incoming) or about-to-be-sent (outgoing) IRC message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Message {
    /// According to RFC 2812, the prefix is optional:
    ///
    /// > If the prefix is missing from the message, it is assumed to have originated from the
    /// > connection from which it was received.
    pub pfx: Option<Pfx>,
    pub command: Command,
}

impl Message {
    pub fn new(command: Command) -> Message {
        Message { pfx: None, command }
    }

    /// Encode to a wire line, including the trailing `\r\n`. Outgoing messages never carry a
    /// prefix (the server fills that in), so only `command` is serialized.
    pub fn encode(&self) -> String {
        self.command.encode()
    }
}

enum MsgType<'a> {
    Cmd(&'a str),
    Num(u16),
}

static CRLF: [u8; 2] = [b'\r', b'\n'];

/// Read one IRC message off a buffer, if a full `\r\n`-terminated line is present. Drops the
/// consumed bytes (including the terminator) from `buf` on both the `Some(Ok(_))` and
/// `Some(Err(_))` paths; a malformed line is still consumed so a single bad line from a
/// misbehaving server doesn't wedge the parser. Returns `None` if no full line is buffered yet.
pub fn parse_irc_msg(buf: &mut Vec<u8>) -> Option<Result<Message, MessageParseError>> {
    // Find the "\r\n" separator first: doing this on the raw bytes rather than after a lossy
    // UTF-8 conversion matters, since replacement characters can change the byte length.
    let crlf_idx = buf.windows(2).position(|sub| sub == CRLF)?;

    let msg_owned: String = String::from_utf8_lossy(&buf[0..crlf_idx]).to_string();
    let ret = parse_one_message(&msg_owned);
    buf.drain(0..crlf_idx + 2);

    Some(ret)
}

// NB. `msg` does not contain the "\r\n" suffix.
fn parse_one_message(mut msg: &str) -> Result<Message, MessageParseError> {
    let original_line = msg.to_owned();
    let err = |reason: String| MessageParseError::new(original_line.clone(), reason);

    let pfx: Option<Pfx> = if msg.starts_with(':') {
        let ws_idx = msg
            .find(' ')
            .ok_or_else(|| err("missing prefix terminator (' ')".to_owned()))?;
        let pfx = &msg[1..ws_idx]; // consume ':'
        msg = &msg[ws_idx + 1..]; // consume ' '
        Some(parse_pfx(pfx))
    } else {
        None
    };

    let msg_ty: MsgType = {
        // A command with no parameters has no trailing space (e.g. a bare "QUIT"), so the
        // absence of a space here means "rest of the line is the command", not a parse error.
        let (cmd, rest) = match msg.find(' ') {
            Some(ws_idx) => (&msg[..ws_idx], &msg[ws_idx + 1..]),
            None => (msg, ""),
        };
        msg = rest;
        match cmd.parse::<u16>() {
            Ok(num) => MsgType::Num(num),
            Err(_) => MsgType::Cmd(cmd),
        }
    };

    let params = parse_params(msg);

    let command = match msg_ty {
        MsgType::Cmd("PRIVMSG") | MsgType::Cmd("NOTICE") if params.len() == 2 => {
            let is_notice = matches!(msg_ty, MsgType::Cmd("NOTICE"));
            let target = MsgTarget::parse(params[0]);
            let (ctcp, text) = split_ctcp(params[1]);
            Command::Privmsg {
                target,
                text: text.to_owned(),
                is_notice,
                ctcp,
            }
        }
        MsgType::Cmd("JOIN") if params.len() == 1 => {
            Command::Join(vec![ChanName::new(params[0].to_owned())])
        }
        MsgType::Cmd("PART") if params.len() == 1 || params.len() == 2 => Command::Part(
            ChanName::new(params[0].to_owned()),
            params.get(1).map(|s| (*s).to_owned()),
        ),
        MsgType::Cmd("QUIT") if params.is_empty() || params.len() == 1 => {
            Command::Quit(params.first().map(|s| (*s).to_owned()))
        }
        MsgType::Cmd("NICK") if params.len() == 1 => Command::Nick(params[0].to_owned()),
        MsgType::Cmd("PING") if params.len() == 1 => Command::Ping(params[0].to_owned()),
        // Keep every param (`PONG <server> :<token>`, or just `PONG :<token>` from some
        // servers) rather than picking one out — the quiescence probe matches the token
        // wherever it lands.
        MsgType::Cmd("PONG") if !params.is_empty() => {
            Command::Pong(params.into_iter().map(|s| s.to_owned()).collect())
        }
        MsgType::Cmd("ERROR") if params.len() == 1 => Command::Error(params[0].to_owned()),
        MsgType::Cmd("TOPIC") if params.len() == 2 => Command::Topic {
            chan: ChanName::new(params[0].to_owned()),
            topic: params[1].to_owned(),
        },
        MsgType::Cmd("KICK") if params.len() == 2 || params.len() == 3 => Command::Kick {
            chan: ChanName::new(params[0].to_owned()),
            nick: params[1].to_owned(),
            reason: params.get(2).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("MODE") if !params.is_empty() => Command::Mode {
            target: params[0].to_owned(),
            modestring: params.get(1).map(|s| (*s).to_owned()).unwrap_or_default(),
            args: params[2.min(params.len())..]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        },
        MsgType::Cmd("CAP") if params.len() == 3 => Command::Cap {
            client: params[0].to_owned(),
            subcommand: params[1].to_owned(),
            params: params[2].split(' ').map(|s| s.to_owned()).collect(),
        },
        MsgType::Cmd("AUTHENTICATE") if params.len() == 1 => {
            Command::Authenticate(params[0].to_owned())
        }
        MsgType::Num(n) => Command::Numeric(n, params.into_iter().map(|s| s.to_owned()).collect()),
        MsgType::Cmd(cmd) => Command::Other(
            cmd.to_owned(),
            params.into_iter().map(|s| s.to_owned()).collect(),
        ),
    };

    Ok(Message { pfx, command })
}

fn parse_params(chrs: &str) -> Vec<&str> {
    // Spec:
    //
    //     params     =  *14( SPACE middle ) [ SPACE ":" trailing ]
    //                =/ 14( SPACE middle ) [ SPACE [ ":" ] trailing ]
    //
    //     nospcrlfcl =  %x01-09 / %x0B-0C / %x0E-1F / %x21-39 / %x3B-FF
    //                     ; any octet except NUL, CR, LF, " " and ":"
    //     middle     =  nospcrlfcl *( ":" / nospcrlfcl )
    //     trailing   =  *( ":" / " " / nospcrlfcl )

    let mut params = Vec::new();
    let mut char_indices = chrs.char_indices();

    while let Some((idx, c)) = char_indices.next() {
        if c == ':' {
            params.push(&chrs[idx + 1..]);
            break;
        }

        if params.len() == 14 {
            params.push(&chrs[idx..]);
            break;
        }

        if c == ' ' {
            continue;
        }

        loop {
            match char_indices.next() {
                Some((idx_, c)) => {
                    if c == ' ' {
                        params.push(&chrs[idx..idx_]);
                        break;
                    }
                }
                None => {
                    params.push(&chrs[idx..]);
                    break;
                }
            }
        }
    }

    params
}

/// Nicks may have a channel-membership prefix (operator, founder, etc). Returns the nick
/// without it. See <http://modern.ircdocs.horse/#channel-membership-prefixes>.
pub fn drop_nick_prefix(nick: &str) -> &str {
    static PREFIXES: [char; 5] = ['~', '&', '@', '%', '+'];
    match nick.chars().next() {
        Some(c) if PREFIXES.contains(&c) => &nick[1..],
        _ => nick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params("p1 p2 p3"), vec!["p1", "p2", "p3"]);
        let empty: Vec<&str> = vec![];
        assert_eq!(parse_params(""), empty);
        assert_eq!(parse_params(":foo bar baz "), vec!["foo bar baz "]);
        assert_eq!(parse_params(":"), vec![""]);
        assert_eq!(parse_params("x:"), vec!["x:"]);
        assert_eq!(parse_params("   "), empty);
    }

    #[test]
    fn test_privmsg_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":nick!~nick@unaffiliated/nick PRIVMSG tiny :a b c\r\n"
        )
        .unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap(),
            Message {
                pfx: Some(Pfx::User {
                    nick: "nick".to_owned(),
                    user: "~nick@unaffiliated/nick".to_owned(),
                }),
                command: Command::Privmsg {
                    target: MsgTarget::User("tiny".to_owned()),
                    text: "a b c".to_owned(),
                    is_notice: false,
                    ctcp: None,
                },
            }
        );
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_notice_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":barjavel.freenode.net NOTICE * :*** Looking up your hostname...\r\n"
        )
        .unwrap();
        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert_eq!(msg.pfx, Some(Pfx::Server("barjavel.freenode.net".to_owned())));
        match msg.command {
            Command::Privmsg {
                is_notice, text, ..
            } => {
                assert!(is_notice);
                assert_eq!(text, "*** Looking up your hostname...");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_join_and_part_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":tiny!~tiny@192.168.0.1 JOIN #haskell\r\n").unwrap();
        write!(&mut buf, ":tiny!~tiny@123.123.123.123 PART #haskell\r\n").unwrap();

        let join = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert_eq!(
            join.command,
            Command::Join(vec![ChanName::new("#haskell".to_owned())])
        );

        let part = parse_irc_msg(&mut buf).unwrap().unwrap();
        assert_eq!(
            part.command,
            Command::Part(ChanName::new("#haskell".to_owned()), None)
        );
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_numeric_parsing_with_isupport() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":barjavel.freenode.net 005 tiny_test CHANTYPES=# EXCEPTS INVEX \
             CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz CHANLIMIT=#:120 PREFIX=(ov)@+ \
             MAXLIST=bqeI:100 MODES=4 NETWORK=freenode STATUSMSG=@+ CALLERID=g \
             CASEMAPPING=rfc1459 :are supported by this server\r\n"
        )
        .unwrap();

        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        match msg.command {
            Command::Numeric(5, params) => assert!(params.contains(&"CHANTYPES=#".to_owned())),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ctcp_action_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":dan!u@localhost PRIVMSG #ircv3 :\x01ACTION writes some specs!\x01\r\n"
        )
        .unwrap();
        let msg = parse_irc_msg(&mut buf).unwrap().unwrap();
        match msg.command {
            Command::Privmsg { ctcp, text, .. } => {
                assert_eq!(ctcp, Some(crate::ctcp::Ctcp::Action));
                assert_eq!(text, "writes some specs!");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_error_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            "ERROR :Closing Link: 212.252.143.51 (Excess Flood)\r\n"
        )
        .unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap(),
            Message {
                pfx: None,
                command: Command::Error("Closing Link: 212.252.143.51 (Excess Flood)".to_owned()),
            },
        );
    }

    #[test]
    fn test_bare_command_with_no_params_is_not_an_error() {
        // No space after the command at all: zero params, not a malformed line.
        let mut buf = vec![];
        write!(&mut buf, "QUIT\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().command,
            Command::Quit(None)
        );

        // An arity mismatch (PRIVMSG needs a target and text) still isn't a line-framing
        // error; it just doesn't match a known variant's param count.
        let mut buf = vec![];
        write!(&mut buf, "PRIVMSG\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().command,
            Command::Other("PRIVMSG".to_owned(), vec![])
        );
    }

    #[test]
    fn test_missing_prefix_terminator_is_parse_error() {
        let mut buf = vec![];
        write!(&mut buf, ":nick\r\n").unwrap();
        assert!(parse_irc_msg(&mut buf).unwrap().is_err());
        // The malformed line is still consumed.
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_parse_pfx() {
        use Pfx::*;
        assert_eq!(parse_pfx("xyz"), Ambiguous("xyz".to_string()));
        assert_eq!(parse_pfx("xy.z"), Server("xy.z".to_string()));
        assert_eq!(
            parse_pfx("xyz[m]"),
            User {
                nick: "xyz[m]".to_string(),
                user: "".to_string()
            }
        );
        assert_eq!(
            parse_pfx("osa1!osa1@x.y.im"),
            User {
                nick: "osa1".to_string(),
                user: "osa1@x.y.im".to_string(),
            }
        );
    }
}
