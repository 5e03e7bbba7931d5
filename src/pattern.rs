use regex::Regex;

/// Wildcard matcher for entry names: `*` matches any run of characters,
/// everything else is literal, comparison is case-insensitive and anchored at
/// both ends. `*.ini` matches `Desktop.INI` but not `notes.initial`.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    re: Regex,
}

impl PathMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(pattern).replace(r"\*", ".*");
        let re = Regex::new(&format!("(?i)^{escaped}$"))?;
        Ok(Self { re })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.re.is_match(name)
    }
}

/// A list of patterns with any-match semantics.
#[derive(Debug, Clone, Default)]
pub struct MatcherSet {
    matchers: Vec<PathMatcher>,
}

impl MatcherSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let matchers = patterns
            .iter()
            .map(|p| PathMatcher::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        let m = PathMatcher::new("*.ini").unwrap();
        assert!(m.is_match("desktop.ini"));
        assert!(m.is_match(".ini"));
        assert!(!m.is_match("notes.initial"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let m = PathMatcher::new("thumbs.db").unwrap();
        assert!(m.is_match("Thumbs.db"));
        assert!(m.is_match("THUMBS.DB"));
    }

    #[test]
    fn matching_is_anchored() {
        let m = PathMatcher::new("@eaDir").unwrap();
        assert!(m.is_match("@eaDir"));
        assert!(!m.is_match("x@eaDir"));
        assert!(!m.is_match("@eaDirs"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let m = PathMatcher::new("a[1].txt").unwrap();
        assert!(m.is_match("a[1].txt"));
        assert!(!m.is_match("a1.txt"));
        let dot = PathMatcher::new("a.b").unwrap();
        assert!(!dot.is_match("axb"));
    }

    #[test]
    fn set_matches_any_member() {
        let set = MatcherSet::new(&["*picasa.ini", "Thumbs.db"]).unwrap();
        assert!(set.is_match(".picasa.ini"));
        assert!(set.is_match("thumbs.db"));
        assert!(!set.is_match("photo.jpg"));
        assert!(!MatcherSet::default().is_match("anything"));
    }
}
