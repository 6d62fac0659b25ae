//! Shared case-insensitive name types used by the other irc crates.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// A single-character case-folding rule. Channel and nick comparisons go
/// through one of these instead of `char::to_ascii_lowercase` directly, so a
/// caller that needs RFC 1459's stricter folding (or a server's custom
/// CASEMAPPING token) can swap it in without forking the type.
pub type CaseFold = fn(char) -> char;

/// ASCII-lowercase folding with the RFC 2812 section 2.2 bracket mapping
/// (`[`, `]`, `\`, `~` fold to `{`, `}`, `|`, `^`). This is the default used
/// by `ChanName`/`ChanNameRef` and by `irc_client`'s user-list tracker.
pub fn ascii_fold(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c.to_ascii_lowercase(),
    }
}

/// Plain ASCII folding with no bracket remapping, for servers that advertise
/// `CASEMAPPING=ascii` in ISUPPORT.
pub fn rfc1459_strict_fold(c: char) -> char {
    c.to_ascii_lowercase()
}

/// Fold a whole string under a given `CaseFold`. Used by the channel/user
/// list tracker, which needs folded `String`s rather than `char` iterators.
pub fn fold_str(s: &str, fold: CaseFold) -> String {
    s.chars().map(fold).collect()
}

/// Channel names according to RFC 2812, section 1.3. Channel names are case
/// insensitive, so this type defines `Eq` and `Hash` that compare under
/// [`ascii_fold`]. `ChanName::display` shows the channel name with the
/// original casing.
#[derive(Debug, Clone)]
pub struct ChanName(String);

/// Slice version of `ChanName`
#[derive(Debug)]
pub struct ChanNameRef(str);

impl Deref for ChanName {
    type Target = ChanNameRef;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

// https://github.com/rust-lang/rust/blob/10b3595ba6a4c658c9dea105488fc562c815e434/library/std/src/path.rs#L1735
impl AsRef<ChanNameRef> for ChanName {
    fn as_ref(&self) -> &ChanNameRef {
        ChanNameRef::new(self.0.as_ref())
    }
}

impl<'a> Borrow<ChanNameRef> for ChanName {
    fn borrow(&self) -> &ChanNameRef {
        self.as_ref()
    }
}

impl ChanName {
    pub fn new(name: String) -> Self {
        ChanName(name)
    }

    pub fn display(&self) -> &str {
        &self.0
    }
}

impl ChanNameRef {
    pub fn new(name: &str) -> &Self {
        unsafe { &*(name as *const str as *const ChanNameRef) }
    }

    pub fn display(&self) -> &str {
        &self.0
    }

    /// Normalize under the default fold ([`ascii_fold`]).
    pub fn normalized(&self) -> String {
        fold_str(&self.0, ascii_fold)
    }

    /// Normalize under a caller-supplied fold, for servers whose
    /// CASEMAPPING differs from the default.
    pub fn normalized_with(&self, fold: CaseFold) -> String {
        fold_str(&self.0, fold)
    }
}

impl ToOwned for ChanNameRef {
    type Owned = ChanName;

    fn to_owned(&self) -> Self::Owned {
        ChanName(self.0.to_owned())
    }
}

impl PartialEq for ChanName {
    fn eq(&self, other: &Self) -> bool {
        let self_borrowed: &ChanNameRef = self.borrow();
        let other_borrowed: &ChanNameRef = other.borrow();
        self_borrowed.eq(other_borrowed)
    }
}

impl Eq for ChanName {}

impl PartialEq<ChanNameRef> for ChanName {
    fn eq(&self, other: &ChanNameRef) -> bool {
        let self_borrowed: &ChanNameRef = self.borrow();
        self_borrowed.eq(other)
    }
}

impl Hash for ChanName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let self_borrowed: &ChanNameRef = self.borrow();
        self_borrowed.hash(state)
    }
}

impl PartialEq for ChanNameRef {
    fn eq(&self, other: &Self) -> bool {
        // https://github.com/rust-lang/rust/blob/b4acb110333392ecdaf890fce080e4b576106aae/library/core/src/slice/mod.rs#L6678-L6684

        // All characters in ASCII have the same encoding length so we can compare byte lengths.
        if self.0.as_bytes().len() != other.0.as_bytes().len() {
            return false;
        }

        self.0
            .chars()
            .map(ascii_fold)
            .zip(other.0.chars().map(ascii_fold))
            .all(|(a, b)| a == b)
    }
}

impl Eq for ChanNameRef {}

impl PartialEq<ChanName> for ChanNameRef {
    fn eq(&self, other: &ChanName) -> bool {
        let other_borrowed: &ChanNameRef = other.borrow();
        self.eq(other_borrowed)
    }
}

impl Hash for ChanNameRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // https://github.com/rust-lang/rust/blob/b4acb110333392ecdaf890fce080e4b576106aae/library/core/src/hash/mod.rs#L653-L656
        self.0.len().hash(state);
        for c in self.0.chars() {
            ascii_fold(c).hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chan_name_eq_case_insensitive() {
        let a = ChanName::new("#Rust".to_string());
        let b = ChanName::new("#rust".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn chan_name_eq_bracket_fold() {
        let a = ChanName::new("#a[b]".to_string());
        let b = ChanName::new("#A{B}".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn normalized_with_rfc1459_strict_no_bracket_fold() {
        let name = ChanNameRef::new("#a[b]");
        assert_eq!(name.normalized_with(rfc1459_strict_fold), "#a[b]");
        assert_eq!(name.normalized(), "#a{b}");
    }

    #[test]
    fn display_preserves_original_casing() {
        let name = ChanName::new("#RustLang".to_string());
        assert_eq!(name.display(), "#RustLang");
    }
}
