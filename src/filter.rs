//! Table Filter
//!
//! Decides whether a table belongs in a snapshot.
//! Exclusions always win: a name that is excluded by name or pattern is never
//! included, whatever the include lists say. With no include rules at all,
//! every non-excluded table is included.

use crate::snapshot::Table;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid table pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Filter configuration
///
/// Patterns are globs: `*` matches any run of characters (including none) and
/// `?` matches exactly one. Every other character is literal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableFilterRule {
    pub include_names: BTreeSet<String>,
    pub exclude_names: BTreeSet<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// When false, names and patterns are lower-cased before comparison
    pub case_sensitive: bool,
}

impl TableFilterRule {
    /// True when the rule cannot exclude anything
    pub fn is_allow_all(&self) -> bool {
        self.include_names.is_empty()
            && self.exclude_names.is_empty()
            && self.include_patterns.is_empty()
            && self.exclude_patterns.is_empty()
    }
}

/// A `TableFilterRule` with its patterns compiled.
///
/// Holds no state that changes between calls, so evaluating one name at a time
/// and filtering a whole list give the same answers.
#[derive(Debug, Clone)]
pub struct TableFilter {
    case_sensitive: bool,
    include_names: HashSet<String>,
    exclude_names: HashSet<String>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
}

impl TableFilter {
    pub fn new(rule: &TableFilterRule) -> Result<Self, FilterError> {
        let case_sensitive = rule.case_sensitive;
        let fold = |s: &String| {
            if case_sensitive {
                s.clone()
            } else {
                s.to_lowercase()
            }
        };

        let compile = |patterns: &[String]| -> Result<Vec<Regex>, FilterError> {
            patterns.iter().map(|p| glob_to_regex(&fold(p))).collect()
        };

        Ok(Self {
            case_sensitive,
            include_names: rule.include_names.iter().map(fold).collect(),
            exclude_names: rule.exclude_names.iter().map(fold).collect(),
            include_patterns: compile(&rule.include_patterns)?,
            exclude_patterns: compile(&rule.exclude_patterns)?,
        })
    }

    /// Filter that includes every table
    pub fn allow_all() -> Self {
        Self {
            case_sensitive: false,
            include_names: HashSet::new(),
            exclude_names: HashSet::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    pub fn should_include(&self, table_name: &str) -> bool {
        let name = self.normalize(table_name);

        if self.exclude_names.contains(name.as_ref()) {
            return false;
        }
        if self.exclude_patterns.iter().any(|p| p.is_match(&name)) {
            return false;
        }
        if self.include_names.is_empty() && self.include_patterns.is_empty() {
            return true;
        }
        if self.include_names.contains(name.as_ref()) {
            return true;
        }
        self.include_patterns.iter().any(|p| p.is_match(&name))
    }

    /// Keep the names that pass the filter, preserving input order
    pub fn filter_names<'a, I>(&self, names: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().filter(|n| self.should_include(n)).collect()
    }

    pub fn retain_tables(&self, mut tables: Vec<Table>) -> Vec<Table> {
        tables.retain(|t| self.should_include(&t.name));
        tables
    }

    fn normalize<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if self.case_sensitive {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(name.to_lowercase())
        }
    }
}

impl Default for TableFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// One-shot evaluation of `rule` against `table_name`
pub fn should_include(table_name: &str, rule: &TableFilterRule) -> Result<bool, FilterError> {
    Ok(TableFilter::new(rule)?.should_include(table_name))
}

/// Translate a glob into an anchored regex. Only `*` and `?` are special.
fn glob_to_regex(pattern: &str) -> Result<Regex, FilterError> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 8);
    expr.push_str("(?s)^");
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|source| FilterError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TableKind;
    use pretty_assertions::assert_eq;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exclude_pattern_over_list() {
        let rule = TableFilterRule {
            exclude_patterns: patterns(&["tmp_*"]),
            ..Default::default()
        };
        let filter = TableFilter::new(&rule).unwrap();

        let included = filter.filter_names(["tmp_cache", "users", "tmp_logs"]);
        assert_eq!(included, vec!["users"]);
    }

    #[test]
    fn test_exclusion_beats_inclusion() {
        let rule = TableFilterRule {
            include_names: names(&["users", "orders"]),
            exclude_names: names(&["users"]),
            ..Default::default()
        };
        assert!(!should_include("users", &rule).unwrap());
        assert!(should_include("orders", &rule).unwrap());

        let rule = TableFilterRule {
            include_patterns: patterns(&["audit_*"]),
            exclude_patterns: patterns(&["*_old"]),
            ..Default::default()
        };
        assert!(should_include("audit_log", &rule).unwrap());
        assert!(!should_include("audit_log_old", &rule).unwrap());
    }

    #[test]
    fn test_default_allow() {
        let rule = TableFilterRule {
            exclude_names: names(&["secrets"]),
            ..Default::default()
        };
        assert!(should_include("anything", &rule).unwrap());
        assert!(!should_include("secrets", &rule).unwrap());
        assert!(TableFilter::allow_all().should_include("whatever"));
    }

    #[test]
    fn test_include_lists_restrict() {
        let rule = TableFilterRule {
            include_names: names(&["users"]),
            include_patterns: patterns(&["order?"]),
            ..Default::default()
        };
        let filter = TableFilter::new(&rule).unwrap();
        assert!(filter.should_include("users"));
        assert!(filter.should_include("orders"));
        assert!(!filter.should_include("order"));
        assert!(!filter.should_include("ordersx"));
        assert!(!filter.should_include("products"));
    }

    #[test]
    fn test_case_insensitive_by_default() {
        let rule = TableFilterRule {
            include_names: names(&["Users"]),
            exclude_patterns: patterns(&["TMP_*"]),
            ..Default::default()
        };
        let filter = TableFilter::new(&rule).unwrap();
        assert!(filter.should_include("USERS"));
        assert!(filter.should_include("users"));
        assert!(!filter.should_include("tmp_cache"));
    }

    #[test]
    fn test_case_sensitive() {
        let rule = TableFilterRule {
            include_names: names(&["Users"]),
            case_sensitive: true,
            ..Default::default()
        };
        let filter = TableFilter::new(&rule).unwrap();
        assert!(filter.should_include("Users"));
        assert!(!filter.should_include("users"));
    }

    #[test]
    fn test_glob_semantics() {
        let star = glob_to_regex("a*b").unwrap();
        assert!(star.is_match("ab"));
        assert!(star.is_match("axxxb"));
        assert!(!star.is_match("abc"));

        let question = glob_to_regex("a?c").unwrap();
        assert!(question.is_match("abc"));
        assert!(!question.is_match("ac"));
        assert!(!question.is_match("abbc"));

        let empty = glob_to_regex("").unwrap();
        assert!(empty.is_match(""));
        assert!(!empty.is_match("a"));
    }

    #[test]
    fn test_glob_metacharacters_are_literal() {
        let dotted = glob_to_regex("a.b").unwrap();
        assert!(dotted.is_match("a.b"));
        assert!(!dotted.is_match("axb"));

        let class = glob_to_regex("[ab]").unwrap();
        assert!(class.is_match("[ab]"));
        assert!(!class.is_match("a"));

        let braces = glob_to_regex("{a,b}").unwrap();
        assert!(braces.is_match("{a,b}"));
        assert!(!braces.is_match("a"));
    }

    #[test]
    fn test_repeated_calls_agree() {
        let rule = TableFilterRule {
            include_patterns: patterns(&["user*"]),
            exclude_names: names(&["user_sessions"]),
            ..Default::default()
        };
        let filter = TableFilter::new(&rule).unwrap();

        for name in ["users", "user_sessions", "orders", "USERS"] {
            let first = filter.should_include(name);
            assert_eq!(first, filter.should_include(name));
            assert_eq!(first, should_include(name, &rule).unwrap());
        }
    }

    #[test]
    fn test_retain_tables() {
        let rule = TableFilterRule {
            exclude_patterns: patterns(&["pg_*"]),
            ..Default::default()
        };
        let filter = TableFilter::new(&rule).unwrap();
        let tables = vec![
            Table::new("pg_stat", TableKind::View, vec![]),
            Table::new("users", TableKind::BaseTable, vec![]),
        ];
        let kept = filter.retain_tables(tables);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "users");
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: TableFilterRule =
            serde_json::from_str(r#"{"excludePatterns": ["tmp_*"]}"#).unwrap();
        assert_eq!(rule.exclude_patterns, vec!["tmp_*".to_string()]);
        assert!(rule.include_names.is_empty());
        assert!(!rule.case_sensitive);
        assert!(!rule.is_allow_all());
    }
}
