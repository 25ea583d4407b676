//! Content fingerprinting and the change decision policy.
//!
//! File modification times are unreliable across copy and cloud-sync
//! operations, so the body hash is the primary change signal and the
//! timestamp is only consulted to classify the direction of a mismatch.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Normalize a body for hashing: unify line endings to LF and drop any
/// trailing whitespace tail. Editors that rewrite CRLF or append a final
/// newline must not register as a content change.
pub fn normalize(body: &str) -> Cow<'_, str> {
    if body.contains('\r') {
        let unified = body.replace("\r\n", "\n").replace('\r', "\n");
        Cow::Owned(unified.trim_end().to_string())
    } else {
        Cow::Borrowed(body.trim_end())
    }
}

/// SHA-256 hex digest of the normalized body.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(body).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Outcome of comparing an index entry against the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Hashes match, nothing to do.
    Unchanged,
    /// Hashes differ and the file's metadata wins. `tiebreak_conflict` is
    /// true when the index timestamp was newer or equal, meaning the
    /// timestamps alone would have pointed the other way.
    FileWins { tiebreak_conflict: bool },
}

/// Hash-first, timestamp-second comparison. The file is the durable source
/// of truth; the index is a derived cache, so on a hash mismatch the file
/// always wins. The timestamps only determine whether the resolution gets
/// surfaced as a conflict.
pub fn decide(
    index_hash: &str,
    index_modified: DateTime<Utc>,
    file_hash: &str,
    file_modified: DateTime<Utc>,
) -> ChangeDecision {
    if index_hash == file_hash {
        return ChangeDecision::Unchanged;
    }
    ChangeDecision::FileWins {
        tiebreak_conflict: file_modified <= index_modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_normalize_unifies_line_endings() {
        assert_eq!(normalize("a\r\nb\r\nc"), "a\nb\nc");
        assert_eq!(normalize("a\rb"), "a\nb");
    }

    #[test]
    fn test_normalize_drops_trailing_whitespace() {
        assert_eq!(normalize("body\n"), "body");
        assert_eq!(normalize("body  \n\n"), "body");
        assert_eq!(normalize("body"), "body");
    }

    #[test]
    fn test_hash_stable_across_line_ending_rewrites() {
        assert_eq!(content_hash("one\ntwo"), content_hash("one\r\ntwo\r\n"));
    }

    #[test]
    fn test_hash_differs_for_different_bodies() {
        assert_ne!(content_hash("one"), content_hash("two"));
    }

    #[test]
    fn test_decide_unchanged_when_hashes_match() {
        let h = content_hash("same");
        assert_eq!(
            decide(&h, ts(100), &h, ts(5000)),
            ChangeDecision::Unchanged
        );
    }

    #[test]
    fn test_decide_file_wins_with_newer_mtime() {
        assert_eq!(
            decide("aaa", ts(100), "bbb", ts(200)),
            ChangeDecision::FileWins {
                tiebreak_conflict: false
            }
        );
    }

    #[test]
    fn test_decide_file_wins_even_with_older_mtime() {
        assert_eq!(
            decide("aaa", ts(200), "bbb", ts(100)),
            ChangeDecision::FileWins {
                tiebreak_conflict: true
            }
        );
        assert_eq!(
            decide("aaa", ts(200), "bbb", ts(200)),
            ChangeDecision::FileWins {
                tiebreak_conflict: true
            }
        );
    }
}
