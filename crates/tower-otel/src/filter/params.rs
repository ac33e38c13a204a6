use std::collections::HashSet;

/// Decides which query parameters may be recorded.
///
/// The blacklist always wins. Without a whitelist every other parameter is recorded; with one,
/// only its members are. `Some` empty whitelist records nothing.
#[derive(Clone, Debug, Default)]
pub struct ParameterPolicy {
    whitelist: Option<HashSet<String>>,
    blacklist: HashSet<String>,
}

impl ParameterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_whitelist<I, P>(mut self, whitelist: Option<I>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.whitelist = whitelist.map(|names| names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_blacklist<I, P>(mut self, blacklist: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.blacklist.extend(blacklist.into_iter().map(Into::into));
        self
    }

    pub fn should_record_param(&self, name: &str) -> bool {
        if self.blacklist.contains(name) {
            return false;
        }

        match &self.whitelist {
            Some(whitelist) => whitelist.contains(name),
            None => true,
        }
    }

    pub fn has_whitelist(&self) -> bool {
        self.whitelist.is_some()
    }

    /// True when no parameter can ever be recorded, letting callers skip query parsing.
    pub fn records_nothing(&self) -> bool {
        matches!(&self.whitelist, Some(whitelist) if whitelist.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_everything_by_default() {
        let policy = ParameterPolicy::new();
        assert!(policy.should_record_param("user_id"));
        assert!(policy.should_record_param(""));
        assert!(!policy.has_whitelist());
    }

    #[test]
    fn blacklist_wins_over_whitelist() {
        let policy = ParameterPolicy::new()
            .with_whitelist(Some(["user_id", "password"]))
            .with_blacklist(["password"]);

        assert!(policy.should_record_param("user_id"));
        assert!(!policy.should_record_param("password"));
        assert!(!policy.should_record_param("page"));
    }

    #[test]
    fn blacklist_alone_records_the_rest() {
        let policy = ParameterPolicy::new().with_blacklist(["token", "secret"]);

        assert!(!policy.should_record_param("token"));
        assert!(!policy.should_record_param("secret"));
        assert!(policy.should_record_param("q"));
    }

    #[test]
    fn explicit_empty_whitelist_records_nothing() {
        let policy = ParameterPolicy::new().with_whitelist(Some(Vec::<String>::new()));

        assert!(policy.records_nothing());
        assert!(!policy.should_record_param("user_id"));
    }
}
