//! Tag matching: string matchers, per-tag matchers and the tags filter
//! deciding which relations and ways are of interest.

use ahash::AHashSet;
use regex::Regex;

use crate::error::Result;
use crate::osm::Tags;

/// Predicate over a single string.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    AlwaysFalse,
    AlwaysTrue,
    Equal(String),
    Prefix(String),
    Substring(String),
    Regex(Regex),
    OneOf(AHashSet<String>),
}

impl StringMatcher {
    pub fn equal(value: impl Into<String>) -> StringMatcher {
        StringMatcher::Equal(value.into())
    }

    pub fn prefix(value: impl Into<String>) -> StringMatcher {
        StringMatcher::Prefix(value.into())
    }

    pub fn substring(value: impl Into<String>) -> StringMatcher {
        StringMatcher::Substring(value.into())
    }

    /// Compile a regex matcher. A malformed pattern is rejected here, never
    /// during streaming.
    pub fn regex(pattern: &str) -> Result<StringMatcher> {
        Ok(StringMatcher::Regex(Regex::new(pattern)?))
    }

    pub fn one_of<S: Into<String>>(values: impl IntoIterator<Item = S>) -> StringMatcher {
        StringMatcher::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::AlwaysFalse => false,
            StringMatcher::AlwaysTrue => true,
            StringMatcher::Equal(s) => value == s,
            StringMatcher::Prefix(s) => value.starts_with(s.as_str()),
            StringMatcher::Substring(s) => value.contains(s.as_str()),
            StringMatcher::Regex(re) => re.is_match(value),
            StringMatcher::OneOf(set) => set.contains(value),
        }
    }
}

impl Default for StringMatcher {
    fn default() -> StringMatcher {
        StringMatcher::AlwaysFalse
    }
}

impl From<bool> for StringMatcher {
    fn from(result: bool) -> StringMatcher {
        if result {
            StringMatcher::AlwaysTrue
        } else {
            StringMatcher::AlwaysFalse
        }
    }
}

impl From<&str> for StringMatcher {
    fn from(value: &str) -> StringMatcher {
        StringMatcher::Equal(value.to_string())
    }
}

impl From<String> for StringMatcher {
    fn from(value: String) -> StringMatcher {
        StringMatcher::Equal(value)
    }
}

impl From<Regex> for StringMatcher {
    fn from(re: Regex) -> StringMatcher {
        StringMatcher::Regex(re)
    }
}

/// Predicate over one (key, value) pair.
///
/// A tag matches if the key matcher matches the key and the value matcher's
/// verdict on the value equals the polarity. The negated polarity expresses
/// "key matches and value does not".
#[derive(Debug, Clone)]
pub struct TagMatcher {
    key: StringMatcher,
    value: StringMatcher,
    result: bool,
}

impl TagMatcher {
    pub fn new(key: impl Into<StringMatcher>, value: impl Into<StringMatcher>) -> TagMatcher {
        TagMatcher {
            key: key.into(),
            value: value.into(),
            result: true,
        }
    }

    pub fn negated(key: impl Into<StringMatcher>, value: impl Into<StringMatcher>) -> TagMatcher {
        TagMatcher {
            key: key.into(),
            value: value.into(),
            result: false,
        }
    }

    /// Match on key alone, any value.
    pub fn key(key: impl Into<StringMatcher>) -> TagMatcher {
        TagMatcher {
            key: key.into(),
            value: StringMatcher::AlwaysTrue,
            result: true,
        }
    }

    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.key.matches(key) && self.value.matches(value) == self.result
    }
}

/// Filter over whole tag lists.
///
/// The filter matches if any contained matcher matches any tag. A filter
/// built with [`TagsFilter::match_all`] matches every non-empty tag list
/// and ignores its matchers.
#[derive(Debug, Clone, Default)]
pub struct TagsFilter {
    matchers: Vec<TagMatcher>,
    match_all: bool,
}

impl TagsFilter {
    /// Filter that matches nothing until matchers are added.
    pub fn new() -> TagsFilter {
        TagsFilter::default()
    }

    /// Filter that matches every non-empty tag list.
    pub fn match_all() -> TagsFilter {
        TagsFilter {
            matchers: Vec::new(),
            match_all: true,
        }
    }

    pub fn add(&mut self, matcher: TagMatcher) {
        self.matchers.push(matcher);
    }

    pub fn with(mut self, matcher: TagMatcher) -> TagsFilter {
        self.add(matcher);
        self
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        if self.match_all {
            return !tags.is_empty();
        }
        tags.iter()
            .any(|tag| self.matchers.iter().any(|m| m.matches(&tag.key, &tag.value)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_matcher_alphabet() {
        assert!(!StringMatcher::AlwaysFalse.matches("anything"));
        assert!(StringMatcher::AlwaysTrue.matches(""));
        assert!(StringMatcher::equal("water").matches("water"));
        assert!(!StringMatcher::equal("water").matches("waterway"));
        assert!(StringMatcher::prefix("water").matches("waterway"));
        assert!(!StringMatcher::prefix("water").matches("stormwater"));
        assert!(StringMatcher::substring("water").matches("stormwater"));
        assert!(StringMatcher::regex("^water(way)?$").unwrap().matches("waterway"));
        assert!(StringMatcher::one_of(["wood", "water"]).matches("wood"));
        assert!(!StringMatcher::one_of(["wood", "water"]).matches("grass"));
    }

    #[test]
    fn malformed_regex_rejected_up_front() {
        assert!(matches!(
            StringMatcher::regex("(unclosed"),
            Err(crate::error::Error::InvalidRegex(_))
        ));
    }

    #[test]
    fn negated_polarity_inverts_the_value_side() {
        let matcher = TagMatcher::negated("boundary", "administrative");
        assert!(matcher.matches("boundary", "maritime"));
        assert!(!matcher.matches("boundary", "administrative"));
        assert!(!matcher.matches("natural", "maritime"));
    }

    #[test]
    fn filter_matches_if_any_matcher_hits_any_tag() {
        let filter = TagsFilter::new()
            .with(TagMatcher::new("natural", "water"))
            .with(TagMatcher::key("building"));

        let water: Tags = [("landuse", "basin"), ("natural", "water")]
            .into_iter()
            .collect();
        assert!(filter.matches(&water));

        let shed: Tags = [("building", "shed")].into_iter().collect();
        assert!(filter.matches(&shed));

        let grass: Tags = [("landuse", "grass")].into_iter().collect();
        assert!(!filter.matches(&grass));

        assert!(!filter.matches(&Tags::new()));
    }

    #[test]
    fn match_all_needs_at_least_one_tag() {
        let filter = TagsFilter::match_all();
        let tagged: Tags = [("building", "yes")].into_iter().collect();
        assert!(filter.matches(&tagged));
        assert!(!filter.matches(&Tags::new()));
    }
}
