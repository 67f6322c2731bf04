//! Last-writer-wins conflict resolution
//!
//! An incoming record wins iff there is no local row or its timestamp is
//! strictly greater. Ties keep the local row, so replaying a record is a
//! no-op and two devices never flip-flop on equal timestamps. Tombstones
//! are ordinary versions: a newer tombstone hides an older live row and a
//! newer resurrection revives an older tombstone.

use crate::models::Version;

/// What applying an incoming version would do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local row yet
    Insert,
    /// Incoming is strictly newer
    Overwrite,
    /// Local row is newer or equal
    KeepLocal,
}

impl Resolution {
    pub fn applies(self) -> bool {
        !matches!(self, Resolution::KeepLocal)
    }
}

pub fn resolve(existing: Option<Version>, incoming: Version) -> Resolution {
    match existing {
        None => Resolution::Insert,
        Some(local) if incoming.updated_at_ms > local.updated_at_ms => Resolution::Overwrite,
        Some(_) => Resolution::KeepLocal,
    }
}

/// Whether `incoming` should replace the stored row
pub fn should_apply(existing: Option<Version>, incoming: Version) -> bool {
    resolve(existing, incoming).applies()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(updated_at_ms: i64, deleted: bool) -> Version {
        Version {
            updated_at_ms,
            deleted,
        }
    }

    #[test]
    fn test_missing_row_always_applies() {
        assert_eq!(resolve(None, v(0, false)), Resolution::Insert);
        assert_eq!(resolve(None, v(5, true)), Resolution::Insert);
    }

    #[test]
    fn test_strictly_newer_wins() {
        assert_eq!(resolve(Some(v(10, false)), v(11, false)), Resolution::Overwrite);
        assert_eq!(resolve(Some(v(10, false)), v(9, false)), Resolution::KeepLocal);
    }

    #[test]
    fn test_tie_keeps_local() {
        assert!(!should_apply(Some(v(10, false)), v(10, true)));
        assert!(!should_apply(Some(v(10, true)), v(10, false)));
    }

    #[test]
    fn test_tombstone_dominance_and_resurrection() {
        // Newer tombstone hides an older live row
        assert!(should_apply(Some(v(10, false)), v(20, true)));
        // Older tombstone cannot hide a newer live row
        assert!(!should_apply(Some(v(30, false)), v(20, true)));
        // Newer resurrection revives
        assert!(should_apply(Some(v(20, true)), v(25, false)));
        // Older resurrection does not
        assert!(!should_apply(Some(v(20, true)), v(15, false)));
    }

    #[test]
    fn test_order_independent_outcome() {
        // Apply a and b in both orders; the surviving version is the same
        let a = v(100, false);
        let b = v(200, true);

        let survive = |first: Version, second: Version| {
            let mut stored = None;
            for incoming in [first, second] {
                if should_apply(stored, incoming) {
                    stored = Some(incoming);
                }
            }
            stored
        };

        assert_eq!(survive(a, b), survive(b, a));
        assert_eq!(survive(a, b), Some(b));
    }
}
