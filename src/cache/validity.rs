//! Validity descriptors.
//!
//! # Protocol
//! ```text
//! stored.check()              → Valid    serve the cached artifact
//!                             → Invalid  recompute
//!                             → Unknown  fetch a fresh descriptor, then
//! stored.check_against(fresh) → Valid    serve
//!                             → else     recompute
//! ```

use std::time::{Duration, SystemTime};

/// Three-valued outcome of a validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
    Unknown,
}

/// Freshness token for a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidityDescriptor {
    /// Always valid. For stages whose output depends only on their input.
    Always,
    /// Never valid.
    Never,
    /// Last-modified time of a source, in milliseconds since the epoch.
    LastModified(u64),
    /// Opaque entity tag of a source.
    ETag(String),
    /// Valid until the deadline, invalid afterwards.
    Expires(SystemTime),
    /// Valid only when every part is valid.
    Aggregate(Vec<ValidityDescriptor>),
}

impl ValidityDescriptor {
    /// Validity bounded to `ttl` from now.
    pub fn expires_in(ttl: Duration) -> Self {
        ValidityDescriptor::Expires(SystemTime::now() + ttl)
    }

    /// Last-modified validity from a file system timestamp.
    pub fn last_modified(time: SystemTime) -> Self {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        ValidityDescriptor::LastModified(millis as u64)
    }

    /// Aggregate component validities. A single `None` (a component that
    /// cannot be cached) makes the whole aggregate uncacheable.
    pub fn aggregate<I>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<ValidityDescriptor>>,
    {
        parts
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .map(ValidityDescriptor::Aggregate)
    }

    /// Check without consulting the live resource.
    pub fn check(&self) -> Validity {
        match self {
            ValidityDescriptor::Always => Validity::Valid,
            ValidityDescriptor::Never => Validity::Invalid,
            ValidityDescriptor::LastModified(_) | ValidityDescriptor::ETag(_) => Validity::Unknown,
            ValidityDescriptor::Expires(deadline) => {
                if SystemTime::now() < *deadline {
                    Validity::Valid
                } else {
                    Validity::Invalid
                }
            }
            ValidityDescriptor::Aggregate(parts) => {
                let mut result = Validity::Valid;
                for part in parts {
                    match part.check() {
                        Validity::Invalid => return Validity::Invalid,
                        Validity::Unknown => result = Validity::Unknown,
                        Validity::Valid => {}
                    }
                }
                result
            }
        }
    }

    /// Compare this (stored) descriptor with a freshly fetched one.
    /// Never returns `Unknown`.
    pub fn check_against(&self, fresh: &ValidityDescriptor) -> Validity {
        use ValidityDescriptor::*;

        match (self, fresh) {
            (Always, _) => Validity::Valid,
            (Never, _) => Validity::Invalid,
            (Expires(_), _) => self.check(),
            // A refreshed entry carries a local expiry bound next to the
            // validity it was produced under; only the latter is compared.
            (Aggregate(stored), _) if has_expiry(stored) && !fresh_has_expiry(fresh) => {
                if self.check() == Validity::Invalid {
                    return Validity::Invalid;
                }
                let rest: Vec<_> = stored.iter().filter(|p| !matches!(p, Expires(_))).cloned().collect();
                match rest.as_slice() {
                    [single] => single.check_against(fresh),
                    _ => Aggregate(rest).check_against(fresh),
                }
            }
            (LastModified(stored), LastModified(current)) => same(stored == current),
            (ETag(stored), ETag(current)) => same(stored == current),
            (Aggregate(stored), Aggregate(current)) if stored.len() == current.len() => {
                let all_valid = stored.iter().zip(current).all(|(s, c)| match s.check() {
                    Validity::Valid => true,
                    Validity::Invalid => false,
                    Validity::Unknown => s.check_against(c) == Validity::Valid,
                });
                same(all_valid)
            }
            _ => Validity::Invalid,
        }
    }
}

fn has_expiry(parts: &[ValidityDescriptor]) -> bool {
    parts.iter().any(|p| matches!(p, ValidityDescriptor::Expires(_)))
}

fn fresh_has_expiry(fresh: &ValidityDescriptor) -> bool {
    matches!(fresh, ValidityDescriptor::Aggregate(parts) if has_expiry(parts))
}

fn same(equal: bool) -> Validity {
    if equal {
        Validity::Valid
    } else {
        Validity::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_checks() {
        assert_eq!(ValidityDescriptor::Always.check(), Validity::Valid);
        assert_eq!(ValidityDescriptor::Never.check(), Validity::Invalid);
        assert_eq!(ValidityDescriptor::LastModified(5).check(), Validity::Unknown);
        assert_eq!(ValidityDescriptor::ETag("a".into()).check(), Validity::Unknown);
    }

    #[test]
    fn test_expiry() {
        assert_eq!(ValidityDescriptor::expires_in(Duration::from_secs(60)).check(), Validity::Valid);
        let past = ValidityDescriptor::Expires(SystemTime::now() - Duration::from_secs(1));
        assert_eq!(past.check(), Validity::Invalid);
        assert_eq!(past.check_against(&ValidityDescriptor::Always), Validity::Invalid);
    }

    #[test]
    fn test_compare_against_fresh() {
        let stored = ValidityDescriptor::LastModified(100);
        assert_eq!(stored.check_against(&ValidityDescriptor::LastModified(100)), Validity::Valid);
        assert_eq!(stored.check_against(&ValidityDescriptor::LastModified(101)), Validity::Invalid);
        assert_eq!(stored.check_against(&ValidityDescriptor::ETag("x".into())), Validity::Invalid);
    }

    #[test]
    fn test_aggregate_requires_every_part() {
        let stored = ValidityDescriptor::Aggregate(vec![
            ValidityDescriptor::Always,
            ValidityDescriptor::ETag("v1".into()),
        ]);
        assert_eq!(stored.check(), Validity::Unknown);

        let same = ValidityDescriptor::Aggregate(vec![
            ValidityDescriptor::Always,
            ValidityDescriptor::ETag("v1".into()),
        ]);
        let changed = ValidityDescriptor::Aggregate(vec![
            ValidityDescriptor::Always,
            ValidityDescriptor::ETag("v2".into()),
        ]);
        assert_eq!(stored.check_against(&same), Validity::Valid);
        assert_eq!(stored.check_against(&changed), Validity::Invalid);
        assert_eq!(
            stored.check_against(&ValidityDescriptor::Aggregate(vec![ValidityDescriptor::Always])),
            Validity::Invalid
        );

        let refreshed = ValidityDescriptor::Aggregate(vec![
            same.clone(),
            ValidityDescriptor::expires_in(Duration::from_secs(60)),
        ]);
        assert_eq!(refreshed.check(), Validity::Unknown);
        assert_eq!(refreshed.check_against(&same), Validity::Valid);
        assert_eq!(refreshed.check_against(&changed), Validity::Invalid);

        let dead = ValidityDescriptor::Aggregate(vec![
            ValidityDescriptor::ETag("v1".into()),
            ValidityDescriptor::Never,
        ]);
        assert_eq!(dead.check(), Validity::Invalid);
    }

    #[test]
    fn test_aggregate_of_uncacheable_part() {
        assert_eq!(
            ValidityDescriptor::aggregate([Some(ValidityDescriptor::Always), None]),
            None
        );
        assert_eq!(
            ValidityDescriptor::aggregate([Some(ValidityDescriptor::Always)]),
            Some(ValidityDescriptor::Aggregate(vec![ValidityDescriptor::Always]))
        );
    }
}
