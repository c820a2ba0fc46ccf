//! Tag rules and the allow/deny rule set built from them.

use crate::osm::Tags;
use std::fmt;

/// A single include or exclude rule. `value: None` matches any value of `key`.
/// A non-empty `except` list matches `key` with any value not listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub included: bool,
    pub key: String,
    pub value: Option<String>,
    pub except: Vec<String>,
}

impl TagRule {
    pub fn matches(&self, tags: &Tags) -> bool {
        match tags.get(&self.key) {
            None => false,
            Some(actual) => {
                self.value.as_deref().is_none_or(|expected| expected == actual)
                    && !self.except.iter().any(|value| value == actual)
            }
        }
    }
}

impl fmt::Display for TagRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.included {
            f.write_str("!")?;
        }
        if self.except.is_empty() {
            write!(f, "{}={}", self.key, self.value.as_deref().unwrap_or("*"))
        } else {
            write!(f, "{}!={}", self.key, self.except.join(","))
        }
    }
}

/// Ordered rule set. An entity passes when at least one included rule
/// matches and no excluded rule does; exclusions win regardless of order.
///
/// A set built with [`TagRuleSet::accept_all`] additionally lets through any
/// entity that carries at least one tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRuleSet {
    rules: Vec<TagRule>,
    default_accept: bool,
}

impl TagRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_all() -> Self {
        Self {
            rules: Vec::new(),
            default_accept: true,
        }
    }

    pub fn add_rule(&mut self, included: bool, key: impl Into<String>, value: Option<String>) {
        self.rules.push(TagRule {
            included,
            key: key.into(),
            value,
            except: Vec::new(),
        });
    }

    /// Include objects that have `key` with a value other than those in
    /// `except`.
    pub fn add_rule_except(&mut self, key: impl Into<String>, except: Vec<String>) {
        self.rules.push(TagRule {
            included: true,
            key: key.into(),
            value: None,
            except,
        });
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        if self
            .rules
            .iter()
            .any(|rule| !rule.included && rule.matches(tags))
        {
            return false;
        }

        self.rules
            .iter()
            .any(|rule| rule.included && rule.matches(tags))
            || (self.default_accept && !tags.is_empty())
    }

    pub fn rules(&self) -> impl Iterator<Item = &TagRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::tags;

    fn waterways() -> TagRuleSet {
        let mut set = TagRuleSet::new();
        set.add_rule(true, "waterway", None);
        set.add_rule(true, "natural", Some("water".into()));
        set
    }

    #[test]
    fn wildcard_rule_matches_any_value() {
        let set = waterways();
        assert!(set.matches(&tags(&[("waterway", "river")])));
        assert!(set.matches(&tags(&[("waterway", "canal")])));
    }

    #[test]
    fn value_rule_needs_exact_value() {
        let set = waterways();
        assert!(set.matches(&tags(&[("natural", "water")])));
        assert!(!set.matches(&tags(&[("natural", "wood")])));
        assert!(!set.matches(&tags(&[("highway", "primary")])));
    }

    #[test]
    fn exclusion_wins_regardless_of_order() {
        let mut excluded_last = waterways();
        excluded_last.add_rule(false, "waterway", Some("ditch".into()));

        let mut excluded_first = TagRuleSet::new();
        excluded_first.add_rule(false, "waterway", Some("ditch".into()));
        excluded_first.add_rule(true, "waterway", None);

        let ditch = tags(&[("waterway", "ditch")]);
        assert!(!excluded_last.matches(&ditch));
        assert!(!excluded_first.matches(&ditch));
        assert!(excluded_first.matches(&tags(&[("waterway", "river")])));
    }

    #[test]
    fn matching_is_repeatable() {
        let set = waterways();
        let river = tags(&[("waterway", "river"), ("name", "Rhine")]);
        let first = set.matches(&river);
        for _ in 0..3 {
            assert_eq!(set.matches(&river), first);
        }
    }

    #[test]
    fn duplicate_rules_are_harmless() {
        let mut set = waterways();
        set.add_rule(true, "waterway", None);
        assert_eq!(set.len(), 3);
        assert!(set.matches(&tags(&[("waterway", "stream")])));
    }

    #[test]
    fn empty_set_rejects_everything() {
        let set = TagRuleSet::new();
        assert!(set.is_empty());
        assert!(!set.matches(&tags(&[("waterway", "river")])));
    }

    #[test]
    fn accept_all_needs_at_least_one_tag() {
        let mut set = TagRuleSet::accept_all();
        assert!(set.matches(&tags(&[("building", "yes")])));
        assert!(!set.matches(&Tags::new()));

        set.add_rule(false, "area", Some("no".into()));
        assert!(!set.matches(&tags(&[("building", "yes"), ("area", "no")])));
    }

    #[test]
    fn rules_display_like_expressions() {
        let mut set = waterways();
        set.add_rule(false, "waterway", Some("ditch".into()));
        let shown: Vec<String> = set.rules().map(|rule| rule.to_string()).collect();
        assert_eq!(shown, vec!["waterway=*", "natural=water", "!waterway=ditch"]);
    }

    #[test]
    fn except_rule_matches_other_values_of_key() {
        let mut set = TagRuleSet::new();
        set.add_rule_except("waterway", vec!["ditch".into(), "drain".into()]);
        assert!(set.matches(&tags(&[("waterway", "river")])));
        assert!(!set.matches(&tags(&[("waterway", "ditch")])));
        assert!(!set.matches(&tags(&[("waterway", "drain")])));
        assert!(!set.matches(&tags(&[("natural", "water")])));
        assert_eq!(set.rules().next().unwrap().to_string(), "waterway!=ditch,drain");
    }
}
