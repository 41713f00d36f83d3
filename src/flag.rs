//! Message flags as reported by SELECTed mailboxes
//!
//! System flags get their own variant; anything else is a keyword.
//! In JSON a flag is its wire form, so `\Seen` becomes `"\\Seen"`.

use serde::{Serialize, Serializer};
use std::fmt;

/// A flag on one message.
///
/// ```
/// use mailbox_bridge::Flag;
///
/// assert_eq!(Flag::Deleted.add_query(), "+FLAGS (\\Deleted)");
/// assert_eq!(Flag::Keyword("$Label1".into()).as_imap_str(), "$Label1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    /// Pending removal at the next EXPUNGE.
    Deleted,
    Draft,
    Recent,
    /// Server or user keyword, without a leading backslash.
    Keyword(String),
}

impl Flag {
    /// Wire form: `\Seen` for system flags, the keyword itself otherwise.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(kw) => kw,
        }
    }

    /// `+FLAGS (...)` store query adding this flag.
    #[must_use]
    pub fn add_query(&self) -> String {
        format!("+FLAGS ({})", self.as_imap_str())
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl Serialize for Flag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_imap_str())
    }
}

impl From<&async_imap::types::Flag<'_>> for Flag {
    fn from(flag: &async_imap::types::Flag<'_>) -> Self {
        use async_imap::types::Flag as Wire;

        match flag {
            Wire::Seen => Self::Seen,
            Wire::Answered => Self::Answered,
            Wire::Flagged => Self::Flagged,
            Wire::Deleted => Self::Deleted,
            Wire::Draft => Self::Draft,
            Wire::Recent => Self::Recent,
            Wire::MayCreate => Self::Keyword("\\*".to_string()),
            Wire::Custom(name) => Self::Keyword(name.to_string()),
        }
    }
}

/// Parse a flag as it appears in a FETCH `FLAGS` list.
impl From<&str> for Flag {
    fn from(name: &str) -> Self {
        Self::from(&async_imap::types::Flag::from(name))
    }
}
