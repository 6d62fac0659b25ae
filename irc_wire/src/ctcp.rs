//! Client-to-client protocol tagging. See <https://defs.ircdocs.horse/defs/ctcp.html>.

const CTCP_DELIM: u8 = 0x01;

/// A CTCP tag, extracted from a PRIVMSG/NOTICE payload.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Ctcp {
    Version,
    Action,
    Ping,
    Other(String),
}

impl Ctcp {
    fn parse_tag(s: &str) -> Ctcp {
        match s {
            "VERSION" => Ctcp::Version,
            "ACTION" => Ctcp::Action,
            "PING" => Ctcp::Ping,
            _ => Ctcp::Other(s.to_owned()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Ctcp::Version => "VERSION",
            Ctcp::Action => "ACTION",
            Ctcp::Ping => "PING",
            Ctcp::Other(tag) => tag,
        }
    }
}

/// Split a PRIVMSG/NOTICE payload into its CTCP tag (if any) and remaining text. Mirrors the
/// minimal `\x01TAG text\x01` framing; malformed/unterminated framing is still accepted per the
/// "SHOULD accept incoming messages which lack [the final delimiter]" note in the modern IRC
/// docs, particularly for CTCP ACTION.
pub fn split_ctcp(mut msg: &str) -> (Option<Ctcp>, &str) {
    if msg.is_empty() || msg.as_bytes()[0] != CTCP_DELIM {
        return (None, msg);
    }

    msg = &msg[1..];
    for (byte_idx, byte) in msg.as_bytes().iter().enumerate() {
        if *byte == CTCP_DELIM {
            let tag = &msg[0..byte_idx];
            let rest = &msg[byte_idx + 1..];
            return (Some(Ctcp::parse_tag(tag)), rest);
        } else if *byte == b' ' {
            let tag = &msg[0..byte_idx];
            let mut rest = &msg[byte_idx + 1..];
            if !rest.is_empty() && rest.as_bytes()[rest.len() - 1] == CTCP_DELIM {
                rest = &rest[..rest.len() - 1];
            }
            return (Some(Ctcp::parse_tag(tag)), rest);
        }
    }

    // No space or closing delimiter found: the whole remainder is the tag, no argument text.
    (Some(Ctcp::parse_tag(msg)), "")
}

/// Wrap a tag and optional argument text into the `\x01TAG arg\x01` wire form.
pub fn encode_ctcp(tag: &str, arg: Option<&str>) -> String {
    match arg {
        Some(arg) if !arg.is_empty() => format!("\x01{} {}\x01", tag, arg),
        _ => format!("\x01{}\x01", tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_with_args() {
        assert_eq!(
            split_ctcp("\x01ACTION writes some specs!\x01"),
            (Some(Ctcp::Action), "writes some specs!")
        );
    }

    #[test]
    fn action_missing_final_delim() {
        assert_eq!(
            split_ctcp("\x01ACTION msg contents"),
            (Some(Ctcp::Action), "msg contents")
        );
    }

    #[test]
    fn version_no_args() {
        assert_eq!(split_ctcp("\x01VERSION\x01"), (Some(Ctcp::Version), ""));
    }

    #[test]
    fn not_ctcp() {
        assert_eq!(split_ctcp("hello"), (None, "hello"));
    }

    #[test]
    fn encode_action() {
        assert_eq!(encode_ctcp("ACTION", Some("waves")), "\x01ACTION waves\x01");
        assert_eq!(encode_ctcp("VERSION", None), "\x01VERSION\x01");
    }
}
