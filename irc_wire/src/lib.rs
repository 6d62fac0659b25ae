//! IRC wire protocol: line framing, typed commands, CTCP, and ISUPPORT server properties.
//!
//! This library targets clients rather than servers or services, and does not implement the IRC
//! message format in full generality — only what a client needs to parse and produce.

pub mod command;
pub mod ctcp;
pub mod error;
pub mod isupport;
pub mod message;

pub use command::{Command, ModeChange};
pub use ctcp::Ctcp;
pub use error::{CommandError, IsupportError, MessageParseError, ModeParseError};
pub use isupport::{ModeType, ServerProperties};
pub use message::{drop_nick_prefix, parse_irc_msg, Message, MsgTarget, Pfx};
