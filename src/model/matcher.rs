/// Predicate over group names used by the batch pause/resume and
/// enumeration operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatcher {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Anything,
}

impl GroupMatcher {
    pub fn matches(&self, group: &str) -> bool {
        match self {
            GroupMatcher::Equals(s) => group == s,
            GroupMatcher::StartsWith(s) => group.starts_with(s.as_str()),
            GroupMatcher::EndsWith(s) => group.ends_with(s.as_str()),
            GroupMatcher::Contains(s) => group.contains(s.as_str()),
            GroupMatcher::Anything => true,
        }
    }

    /// The literal group name when this matcher is an equality match.
    ///
    /// An equality pause applies to the named group even before any of its
    /// members exist, so callers need the name itself.
    pub fn exact(&self) -> Option<&str> {
        match self {
            GroupMatcher::Equals(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_operators() {
        assert!(GroupMatcher::Equals("jobs".into()).matches("jobs"));
        assert!(!GroupMatcher::Equals("jobs".into()).matches("jobs2"));
        assert!(GroupMatcher::StartsWith("re".into()).matches("reports"));
        assert!(GroupMatcher::EndsWith("ly".into()).matches("nightly"));
        assert!(GroupMatcher::Contains("dex".into()).matches("indexers"));
        assert!(GroupMatcher::Anything.matches("anything-at-all"));
    }

    #[test]
    fn test_exact_only_for_equals() {
        assert_eq!(GroupMatcher::Equals("g".into()).exact(), Some("g"));
        assert_eq!(GroupMatcher::Contains("g".into()).exact(), None);
        assert_eq!(GroupMatcher::Anything.exact(), None);
    }
}
