use std::fmt;

/// Access level a user holds on a single repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Permission {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
}

impl Permission {
    pub fn has_read(&self) -> bool {
        *self >= Permission::Read
    }

    pub fn has_write(&self) -> bool {
        *self == Permission::Write
    }

    /// Parse the short form used by `repos.json` and the admin console.
    ///
    /// Returns `None` for anything other than `r` or `rw`.
    pub fn parse_short(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Permission::Read),
            "rw" => Some(Permission::Write),
            _ => None,
        }
    }

    /// Short form for persistence.  [`Permission::None`] is never persisted.
    pub fn as_short(&self) -> Option<&'static str> {
        match self {
            Permission::None => None,
            Permission::Read => Some("r"),
            Permission::Write => Some("rw"),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_short().unwrap_or("none"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Ordering ─────────────────────────────────────────────────────

    #[test]
    fn test_permission_ordering() {
        assert!(Permission::None < Permission::Read);
        assert!(Permission::Read < Permission::Write);
    }

    #[test]
    fn test_permission_has_read() {
        assert!(!Permission::None.has_read());
        assert!(Permission::Read.has_read());
        assert!(Permission::Write.has_read());
    }

    #[test]
    fn test_permission_has_write_is_exact() {
        assert!(!Permission::None.has_write());
        assert!(!Permission::Read.has_write());
        assert!(Permission::Write.has_write());
    }

    #[test]
    fn test_permission_default() {
        assert_eq!(Permission::default(), Permission::None);
    }

    // ── Short form ───────────────────────────────────────────────────

    #[test]
    fn test_parse_short() {
        assert_eq!(Permission::parse_short("r"), Some(Permission::Read));
        assert_eq!(Permission::parse_short("rw"), Some(Permission::Write));
        assert_eq!(Permission::parse_short("w"), None);
        assert_eq!(Permission::parse_short("read"), None);
        assert_eq!(Permission::parse_short(""), None);
    }

    #[test]
    fn test_none_is_never_persisted() {
        assert_eq!(Permission::None.as_short(), None);
        assert_eq!(Permission::Write.as_short(), Some("rw"));
    }
}
