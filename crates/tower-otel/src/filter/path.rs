use crate::{Error, Result};
use regex::Regex;
use std::collections::HashSet;

/// Upper bound on the entries accepted by a single bulk path or prefix call.
pub const MAX_PATHS_PER_CALL: usize = 1000;

/// Decides whether a request path is excluded from instrumentation.
///
/// Three rules are OR'd together: exact match, prefix match and regex match. They are checked
/// cheapest first. An empty filter excludes nothing, not even the empty path.
///
/// A `PathFilter` is assembled while the middleware is configured and is read-only afterwards,
/// so it is shared between requests without locking.
#[derive(Clone, Debug, Default)]
pub struct PathFilter {
    exact: HashSet<String>,
    prefixes: Vec<String>,
    patterns: Vec<Regex>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude each of `paths` when matched exactly. Duplicates collapse.
    pub fn add_paths<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.exact.extend(paths.into_iter().map(Into::into));
    }

    /// Exclude every path starting with one of `prefixes`.
    ///
    /// The prefix is matched byte-for-byte: `/debug/` excludes `/debug/vars` but not `/debug`.
    pub fn add_prefixes<I, P>(&mut self, prefixes: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
    }

    /// Exclude every path matched by one of `patterns`.
    pub fn add_patterns<I>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = Regex>,
    {
        self.patterns.extend(patterns);
    }

    pub fn should_exclude(&self, path: &str) -> bool {
        if self.exact.contains(path) {
            return true;
        }

        if self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return true;
        }

        self.patterns.iter().any(|pattern| pattern.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.patterns.is_empty()
    }
}

/// Compile `patterns`, failing on the first one that is not a valid regex.
pub fn compile_patterns<I, P>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            Regex::new(pattern).map_err(|source| Error::InvalidRegex {
                pattern: pattern.to_owned(),
                source,
            })
        })
        .collect()
}
