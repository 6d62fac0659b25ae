//! Property-based round-trip coverage: `Command::encode` followed by `parse_irc_msg` should
//! always reconstruct the same command for the variants a client actually sends.

use proptest::prelude::*;

use irc_common::ChanName;
use irc_wire::{parse_irc_msg, Command, MsgTarget};

/// A "word": no whitespace, no NUL/CR/LF, doesn't start with `:` — safe as a middle parameter
/// anywhere in a line.
fn word() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_|]{0,8}"
}

/// Trailing-parameter text: no CR/LF/NUL (those would either break line framing or get rejected
/// outright), spaces and colons allowed.
fn trailing_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_ :]{0,24}"
}

fn parse_one(encoded: &str) -> Command {
    let mut buf = encoded.as_bytes().to_vec();
    match parse_irc_msg(&mut buf) {
        Some(Ok(msg)) => msg.command,
        Some(Err(e)) => panic!("failed to parse {:?}: {}", encoded, e),
        None => panic!("parse_irc_msg found no complete line in {:?}", encoded),
    }
}

proptest! {
    #[test]
    fn nick_round_trips(nick in word()) {
        let cmd = Command::nick(&nick);
        prop_assert_eq!(parse_one(&cmd.encode()), cmd);
    }

    #[test]
    fn ping_round_trips(token in word()) {
        let cmd = Command::ping(&token);
        prop_assert_eq!(parse_one(&cmd.encode()), cmd);
    }

    #[test]
    fn pong_round_trips(token in word()) {
        let cmd = Command::pong(&token);
        prop_assert_eq!(parse_one(&cmd.encode()), cmd);
    }

    #[test]
    fn quit_with_reason_round_trips(reason in trailing_text()) {
        let cmd = Command::quit(Some(reason));
        prop_assert_eq!(parse_one(&cmd.encode()), cmd);
    }

    #[test]
    fn quit_without_reason_round_trips(_unused in Just(())) {
        let cmd = Command::quit(None);
        prop_assert_eq!(parse_one(&cmd.encode()), cmd);
    }

    #[test]
    fn privmsg_to_channel_round_trips(target in word(), text in trailing_text()) {
        let target = format!("#{}", target);
        let cmd = Command::privmsg(&target, &text).unwrap();
        let parsed = parse_one(&cmd.encode());
        match (&parsed, &cmd) {
            (
                Command::Privmsg { target: pt, text: ptext, is_notice: pn, .. },
                Command::Privmsg { target: ct, text: ctext, is_notice: cn, .. },
            ) => {
                prop_assert_eq!(pt, ct);
                prop_assert_eq!(ptext, ctext);
                prop_assert_eq!(pn, cn);
            }
            _ => prop_assert!(false, "expected both sides to be Privmsg, got {:?}", parsed),
        }
    }

    #[test]
    fn single_channel_join_round_trips(name in word()) {
        let chan = ChanName::new(format!("#{}", name));
        let cmd = Command::join([&chan]);
        prop_assert_eq!(parse_one(&cmd.encode()), cmd);
    }
}

#[test]
fn privmsg_target_parses_back_to_the_same_channel() {
    let cmd = Command::privmsg("#rust", "hello there").unwrap();
    let parsed = parse_one(&cmd.encode());
    match parsed {
        Command::Privmsg { target: MsgTarget::Chan(chan), text, .. } => {
            assert_eq!(chan.display(), "#rust");
            assert_eq!(text, "hello there");
        }
        other => panic!("expected a channel Privmsg, got {:?}", other),
    }
}
