use thiserror::Error;

/// A line was read off the wire but could not be parsed into a [`crate::Message`].
#[derive(Debug, Clone, Error)]
#[error("invalid IRC message {original_line:?}: {reason}")]
pub struct MessageParseError {
    pub original_line: String,
    pub reason: String,
}

impl MessageParseError {
    pub fn new(original_line: impl Into<String>, reason: impl Into<String>) -> Self {
        MessageParseError {
            original_line: original_line.into(),
            reason: reason.into(),
        }
    }
}

/// A `Command` constructor was given arguments that can't be encoded onto the wire.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("PRIVMSG/NOTICE to {target:?} is {len} bytes, over the 512 byte line limit")]
    MessageTooLong { target: String, len: usize },
}

/// A server's `PREFIX` ISUPPORT token couldn't be decoded.
#[derive(Debug, Clone, Error)]
pub enum IsupportError {
    #[error("PREFIX token {raw:?} is not of the form \"(modes)chars\"")]
    PrefixMalformed { raw: String },

    #[error("PREFIX token has {} mode letters but {} prefix chars: {modes:?} vs {prefix_chars:?}", modes.len(), prefix_chars.len())]
    PrefixMismatch { modes: String, prefix_chars: String },
}

/// A MODE parameter string could not be decoded into [`crate::command::ModeChange`]s.
#[derive(Debug, Clone, Error)]
pub enum ModeParseError {
    #[error("empty mode string")]
    Empty,

    #[error("mode string {0:?} does not start with '+' or '-'")]
    MissingSign(String),

    #[error("not enough arguments for mode string {modestring:?}: needed {needed}, got {got}")]
    NotEnoughArguments {
        modestring: String,
        needed: usize,
        got: usize,
    },
}
