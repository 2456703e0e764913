use std::time::Duration;

/// A sorted-set member together with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// The shape a key currently holds, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    String,
    Hash,
    SortedSet,
}

/// A single write inside a pipelined batch.
///
/// Pipelines batch round-trips; they are not transactions. Observers must
/// tolerate the brief window in which only a prefix of the batch has been
/// applied.
#[derive(Debug, Clone)]
pub enum KvOp {
    Set { key: String, value: String },
    Del { key: String },
    HSet { key: String, field: String, value: String },
    HDel { key: String, field: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
    Expire { key: String, ttl: Duration },
}

/// Glob matching for scan patterns and exclude lists. Only `*` is
/// interpreted; everything else matches literally.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == candidate;
    }

    let mut rest = candidate;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }

    // Pattern ended with `*`, so any remainder is fine.
    true
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn test_glob_literal() {
        assert!(glob_match("posting:hello", "posting:hello"));
        assert!(!glob_match("posting:hello", "posting:world"));
    }

    #[test]
    fn test_glob_prefix() {
        assert!(glob_match("posting:*", "posting:hello"));
        assert!(glob_match("posting:*", "posting:"));
        assert!(!glob_match("posting:*", "meta:email"));
    }

    #[test]
    fn test_glob_infix_and_suffix() {
        assert!(glob_match("*_chunk_*", "doc1_chunk_0"));
        assert!(glob_match("*.tmp", "upload.tmp"));
        assert!(!glob_match("*.tmp", "upload.tmp.bak"));
    }
}
