//! Principal types and the principal name normalizer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of identity a principal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalKind {
    /// A user account.
    User,
    /// A group the account belongs to.
    Group,
}

/// An identity token attached to an authenticated subject.
///
/// A successful authentication yields exactly one `User` principal named
/// after the account's short name, plus one `Group` principal per group
/// membership value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Whether this is a user or group principal.
    pub kind: PrincipalKind,
    /// The principal name.
    pub name: String,
}

impl Principal {
    /// Creates a user principal.
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::User,
            name: name.into(),
        }
    }

    /// Creates a group principal.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: PrincipalKind::Group,
            name: name.into(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PrincipalKind::User => write!(f, "user:{}", self.name),
            PrincipalKind::Group => write!(f, "group:{}", self.name),
        }
    }
}

/// Extracts the short name from a possibly fully-qualified directory name.
///
/// Some upstream providers hand back full DNs such as
/// `CN=Sales,OU=Groups,DC=example,DC=com`; this returns `Sales`. The value
/// ends at the first comma not immediately preceded by a backslash, so
/// escaped commas stay part of the name (`CN=A\,B,OU=X` yields `A\,B`).
/// Anything that does not match the `CN=<value>,<rest>` shape, including a
/// bare `CN=value`, is returned unmodified.
#[must_use]
pub fn short_principal_name(name: &str) -> &str {
    let Some(value) = name.strip_prefix("CN=") else {
        return name;
    };

    let mut escaped = false;
    for (i, b) in value.bytes().enumerate() {
        if b == b',' && !escaped {
            return &value[..i];
        }
        escaped = b == b'\\';
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_cn_from_full_dn() {
        assert_eq!(
            short_principal_name("CN=Sales,OU=Groups,DC=example,DC=com"),
            "Sales"
        );
    }

    #[test]
    fn escaped_comma_is_not_a_delimiter() {
        assert_eq!(short_principal_name("CN=A\\,B,OU=X"), "A\\,B");
    }

    #[test]
    fn comma_after_backslash_pair_still_escaped() {
        // The character before the comma is a backslash, so the comma does
        // not terminate the value and the name falls through unchanged.
        assert_eq!(short_principal_name("CN=A\\\\,B"), "CN=A\\\\,B");
    }

    #[test]
    fn bare_cn_without_trailing_comma_is_unchanged() {
        assert_eq!(short_principal_name("CN=Sales"), "CN=Sales");
    }

    #[test]
    fn non_dn_names_are_unchanged() {
        assert_eq!(short_principal_name("jdoe"), "jdoe");
        assert_eq!(short_principal_name("OU=Groups,DC=example"), "OU=Groups,DC=example");
        assert_eq!(short_principal_name(""), "");
    }

    #[test]
    fn empty_cn_value_is_extracted() {
        assert_eq!(short_principal_name("CN=,OU=X"), "");
    }

    #[test]
    fn principal_display() {
        assert_eq!(Principal::user("jdoe").to_string(), "user:jdoe");
        assert_eq!(Principal::group("Sales").to_string(), "group:Sales");
    }

    #[test]
    fn principals_are_set_members() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Principal::user("jdoe"));
        set.insert(Principal::user("jdoe"));
        set.insert(Principal::group("jdoe"));
        assert_eq!(set.len(), 2);
    }
}
