//! Server properties (RPL_ISUPPORT / numeric 005), merged in as they arrive.

use std::collections::HashMap;

use crate::error::IsupportError;

/// The "type" of a channel mode letter, per CHANMODES semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeType {
    /// Takes a parameter on both add and remove; edits a list rather than replacing a value
    /// (ban/except/invex lists, and the channel's prefix modes).
    List,
    /// Takes a parameter on both add and remove, but the value is replaced (e.g. `+k`).
    ParamUnset,
    /// Takes a parameter on add only (e.g. `+l`).
    Param,
    /// Boolean flag, never takes a parameter (e.g. `+m`).
    NoParam,
}

/// Accumulated ISUPPORT (005) tokens. `None` for a key means the token was a bare flag
/// (`KEY`, with no `=value`); `Some(v)` means `KEY=v`. A `-KEY` token removes a previously seen
/// key, per the ISUPPORT spec's negation form.
#[derive(Debug, Clone)]
pub struct ServerProperties {
    values: HashMap<String, Option<String>>,
}

impl Default for ServerProperties {
    fn default() -> Self {
        ServerProperties {
            values: HashMap::new(),
        }
    }
}

impl ServerProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the params of one RPL_ISUPPORT (005) message in. The trailing "are supported by
    /// this server" parameter (if present, conventionally the last one when it doesn't contain
    /// '=') is ignored.
    pub fn merge_isupport_params(&mut self, params: &[String]) {
        for token in params {
            if token.contains(' ') {
                // The trailing human-readable message, not a token.
                continue;
            }
            if let Some(key) = token.strip_prefix('-') {
                self.values.remove(key);
                continue;
            }
            match token.split_once('=') {
                Some((key, val)) => {
                    self.values.insert(key.to_owned(), Some(val.to_owned()));
                }
                None => {
                    self.values.insert(token.clone(), None);
                }
            }
        }
    }

    fn get(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Some(v)) => v.clone(),
            _ => default.to_owned(),
        }
    }

    pub fn chantypes(&self) -> String {
        self.get("CHANTYPES", "#")
    }

    fn prefix_raw(&self) -> String {
        self.get("PREFIX", "(ov)@+")
    }

    /// `[(mode, prefix)]` in order of most to least power, e.g. `[('o', '@'), ('v', '+')]`.
    /// Lenient: a malformed `PREFIX` token (mismatched lengths, missing parens) is treated as
    /// "no prefixes" rather than propagated. Internal callers that already run off the main
    /// dispatch path (C8's rank-mode bookkeeping) use this one; [`Self::prefixes_checked`] is the
    /// spec's raising accessor, for callers that want to surface a malformed server reply.
    pub fn prefixes(&self) -> Vec<(char, char)> {
        self.prefixes_checked().unwrap_or_default()
    }

    /// Like [`Self::prefixes`], but raises [`IsupportError::PrefixMismatch`] on a malformed
    /// `PREFIX` token instead of silently dropping it, per `spec.md` §4.3 ("raise if lengths
    /// mismatch").
    pub fn prefixes_checked(&self) -> Result<Vec<(char, char)>, IsupportError> {
        let raw = self.prefix_raw();
        let (modes, prefixes) = raw
            .strip_prefix('(')
            .and_then(|s| s.split_once(')'))
            .ok_or_else(|| IsupportError::PrefixMalformed { raw: raw.clone() })?;
        if modes.chars().count() != prefixes.chars().count() {
            return Err(IsupportError::PrefixMismatch {
                modes: modes.to_owned(),
                prefix_chars: prefixes.to_owned(),
            });
        }
        Ok(modes.chars().zip(prefixes.chars()).collect())
    }

    fn chanmodes_raw(&self) -> String {
        self.get("CHANMODES", "b,k,l,imnst")
    }

    /// `{mode letter -> ModeType}`, derived from CHANMODES plus the channel's PREFIX modes
    /// (which are always list-type, since they edit a per-nick set rather than a single value).
    pub fn channel_modes(&self) -> HashMap<char, ModeType> {
        let raw = self.chanmodes_raw();
        let groups: Vec<&str> = raw.split(',').collect();
        let mut result = HashMap::new();
        let kinds = [
            ModeType::List,
            ModeType::ParamUnset,
            ModeType::Param,
            ModeType::NoParam,
        ];
        for (group, kind) in groups.iter().zip(kinds.iter()) {
            for letter in group.chars() {
                result.insert(letter, *kind);
            }
        }
        for (mode, _) in self.prefixes() {
            result.insert(mode, ModeType::List);
        }
        result
    }

    /// The type of a channel mode letter, or `None` if the server hasn't told us about it
    /// (callers should default to treating unknown modes as `NoParam`).
    pub fn mode_type(&self, letter: char) -> Option<ModeType> {
        self.channel_modes().get(&letter).copied()
    }

    pub fn network(&self) -> Option<String> {
        self.values.get("NETWORK").and_then(|v| v.clone())
    }

    pub fn casemapping(&self) -> String {
        self.get("CASEMAPPING", "rfc1459")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_with_no_isupport_seen() {
        let props = ServerProperties::new();
        assert_eq!(props.chantypes(), "#");
        assert_eq!(props.prefixes(), vec![('o', '@'), ('v', '+')]);
    }

    #[test]
    fn merges_and_derives_channel_modes() {
        let mut props = ServerProperties::new();
        props.merge_isupport_params(&params(&[
            "CHANTYPES=#",
            "EXCEPTS",
            "CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz",
            "PREFIX=(ov)@+",
            "NETWORK=freenode",
            "are supported by this server",
        ]));
        assert_eq!(props.chantypes(), "#");
        assert_eq!(props.network().as_deref(), Some("freenode"));
        let modes = props.channel_modes();
        assert_eq!(modes.get(&'b'), Some(&ModeType::List));
        assert_eq!(modes.get(&'k'), Some(&ModeType::ParamUnset));
        assert_eq!(modes.get(&'f'), Some(&ModeType::Param));
        assert_eq!(modes.get(&'m'), Some(&ModeType::NoParam));
        // prefix modes are always list-type
        assert_eq!(modes.get(&'o'), Some(&ModeType::List));
        assert_eq!(modes.get(&'v'), Some(&ModeType::List));
    }

    #[test]
    fn negated_token_removes_previous_value() {
        let mut props = ServerProperties::new();
        props.merge_isupport_params(&params(&["EXCEPTS"]));
        assert!(props.values.contains_key("EXCEPTS"));
        props.merge_isupport_params(&params(&["-EXCEPTS"]));
        assert!(!props.values.contains_key("EXCEPTS"));
    }
}
