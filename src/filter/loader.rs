use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::expr::{Operator, ValueMatch, parse_expression};
use super::rules::TagRuleSet;
use crate::error::{Error, Result};

/// Load a filter expression file into a rule set.
///
/// One expression per line; `#` starts a comment, blank lines are skipped
/// and a trailing carriage return is tolerated. Rules are appended in file
/// order.
pub fn load_expressions(path: &Path) -> Result<TagRuleSet> {
    let file = File::open(path).map_err(|source| Error::FileNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    parse_expressions(BufReader::new(file), path)
}

/// Same as [`load_expressions`] for an already opened reader. `origin` is
/// only used in error messages.
pub fn parse_expressions<R: BufRead>(reader: R, origin: &Path) -> Result<TagRuleSet> {
    let mut set = TagRuleSet::new();

    for (index, line) in reader.lines().enumerate() {
        let mut line = line?;
        let line_no = index as u64 + 1;

        if let Some(pos) = line.find('#') {
            line.truncate(pos);
        }
        if line.ends_with('\r') {
            line.pop();
        }
        if line.trim().is_empty() {
            continue;
        }

        let expr = parse_expression(&line).map_err(|reason| Error::MalformedExpression {
            path: origin.to_path_buf(),
            line: line_no,
            text: line.clone(),
            reason,
        })?;

        match expr.operator {
            Operator::Equal => {
                for value in expr.values {
                    set.add_rule(true, expr.key.clone(), value.into_option());
                }
            }
            Operator::NotEqual => {
                let except = expr
                    .values
                    .into_iter()
                    .map(ValueMatch::into_option)
                    .collect::<Option<Vec<String>>>()
                    .ok_or_else(|| Error::MalformedExpression {
                        path: origin.to_path_buf(),
                        line: line_no,
                        text: line.clone(),
                        reason: "'!=' needs concrete values, not '*'".to_string(),
                    })?;
                set.add_rule_except(expr.key, except);
            }
        }
    }

    for rule in set.rules() {
        tracing::info!("adding filter rule {}", rule);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TagRule;
    use crate::osm::tags;
    use std::io::Cursor;
    use std::io::Write;

    fn parse(text: &str) -> Result<TagRuleSet> {
        parse_expressions(Cursor::new(text), Path::new("filter.txt"))
    }

    fn rules(set: &TagRuleSet) -> Vec<TagRule> {
        set.rules().cloned().collect()
    }

    #[test]
    fn trailing_comment_is_stripped() {
        let with_comment = parse("waterway=river # main channel\n").unwrap();
        let plain = parse("waterway=river\n").unwrap();
        assert_eq!(rules(&with_comment), rules(&plain));
        assert_eq!(with_comment.len(), 1);
    }

    #[test]
    fn blank_and_comment_lines_add_nothing() {
        let set = parse("\n# only a comment\n   \n\r\nwaterway\n").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(rules(&set)[0].key, "waterway");
        assert_eq!(rules(&set)[0].value, None);
    }

    #[test]
    fn windows_line_endings_are_tolerated() {
        let set = parse("natural=water\r\nlanduse=reservoir\r\n").unwrap();
        let values: Vec<Option<String>> = set.rules().map(|r| r.value.clone()).collect();
        assert_eq!(
            values,
            vec![Some("water".to_string()), Some("reservoir".to_string())]
        );
    }

    #[test]
    fn rules_keep_file_order_and_expand_value_lists() {
        let set = parse("w/waterway=river,canal\nnatural=water\n").unwrap();
        let shown: Vec<String> = set.rules().map(|r| r.to_string()).collect();
        assert_eq!(
            shown,
            vec!["waterway=river", "waterway=canal", "natural=water"]
        );
    }

    #[test]
    fn not_equal_line_alone_selects_other_values() {
        let set = parse("waterway!=ditch\n").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.rules().all(|rule| rule.included));
        assert!(set.matches(&tags(&[("waterway", "river")])));
        assert!(!set.matches(&tags(&[("waterway", "ditch")])));
        assert!(!set.matches(&tags(&[("natural", "water")])));
    }

    #[test]
    fn not_equal_value_list_is_one_rule() {
        let set = parse("waterway!=ditch,drain\n").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.matches(&tags(&[("waterway", "canal")])));
        assert!(!set.matches(&tags(&[("waterway", "drain")])));
    }

    #[test]
    fn not_equal_wildcard_is_malformed() {
        let err = parse("waterway!=*\n").unwrap_err();
        assert!(matches!(err, Error::MalformedExpression { line: 1, .. }));
    }

    #[test]
    fn malformed_line_fails_whole_load_with_line_number() {
        let err = parse("waterway\n=river\nnatural\n").unwrap_err();
        match err {
            Error::MalformedExpression { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "=river");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_expressions(Path::new("/nonexistent/filter.txt")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
        assert!(err.to_string().contains("Could not open file"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# water features").unwrap();
        writeln!(file, "waterway").unwrap();
        writeln!(file, "natural=water").unwrap();
        let set = load_expressions(file.path()).unwrap();
        assert_eq!(set.len(), 2);
    }
}
