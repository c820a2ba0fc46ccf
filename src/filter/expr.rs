//! Parser for single filter expression lines.
//!
//! Grammar (in rough EBNF):
//!
//! line       = [prefix "/"] key [operator value_list]
//! prefix     = ("n" | "w" | "r" | "a")+
//! operator   = "=" | "!="
//! value_list = value ("," value)*
//!
//! Keys and values are trimmed; `*` as a value means "any value".

use winnow::combinator::{alt, opt, separated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

// Manually define PResult for resilience against winnow version changes
type PResult<T> = Result<T, ErrMode<ContextError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    Any,
    Exact(String),
}

impl ValueMatch {
    pub fn into_option(self) -> Option<String> {
        match self {
            ValueMatch::Any => None,
            ValueMatch::Exact(value) => Some(value),
        }
    }
}

/// A parsed expression line. A bare key parses as `key=*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<ValueMatch>,
}

/// Object-type prefix such as `w/` or `nwr/`. Only the tag part of an
/// expression is used, so the prefix is consumed and dropped.
fn entity_prefix(input: &mut &str) -> PResult<()> {
    (
        take_while(1.., |c: char| matches!(c, 'n' | 'w' | 'r' | 'a')),
        '/',
    )
        .void()
        .parse_next(input)
}

fn key(input: &mut &str) -> PResult<String> {
    take_while(1.., |c: char| !matches!(c, '=' | '!' | ','))
        .map(|s: &str| s.trim().to_string())
        .parse_next(input)
}

fn operator(input: &mut &str) -> PResult<Operator> {
    alt(("!=".value(Operator::NotEqual), "=".value(Operator::Equal))).parse_next(input)
}

fn value(input: &mut &str) -> PResult<String> {
    take_while(1.., |c: char| c != ',')
        .map(|s: &str| s.trim().to_string())
        .parse_next(input)
}

fn value_list(input: &mut &str) -> PResult<Vec<String>> {
    separated(1.., value, ',').parse_next(input)
}

/// Parse one expression line (comments already stripped).
pub fn parse_expression(line: &str) -> Result<Expression, String> {
    let mut remaining = line.trim();
    if remaining.is_empty() {
        return Err("empty expression".to_string());
    }

    opt(entity_prefix)
        .parse_next(&mut remaining)
        .map_err(|_| format!("invalid object type prefix at '{}'", remaining))?;

    let key = key
        .parse_next(&mut remaining)
        .map_err(|_| format!("expected a tag key at '{}'", remaining))?;
    if key.is_empty() {
        return Err("empty tag key".to_string());
    }

    let tail = opt((operator, value_list))
        .parse_next(&mut remaining)
        .map_err(|e| format!("invalid value list: {:?}", e))?;

    // Ensure we consumed all input
    if !remaining.is_empty() {
        return Err(format!("unexpected '{}'", remaining));
    }

    let Some((operator, raw_values)) = tail else {
        return Ok(Expression {
            key,
            operator: Operator::Equal,
            values: vec![ValueMatch::Any],
        });
    };

    let mut values = Vec::with_capacity(raw_values.len());
    for raw in raw_values {
        match raw.as_str() {
            "" => return Err(format!("empty value for key '{}'", key)),
            "*" => values.push(ValueMatch::Any),
            _ => values.push(ValueMatch::Exact(raw)),
        }
    }

    Ok(Expression {
        key,
        operator,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_key() {
        let expr = parse_expression("waterway").unwrap();
        assert_eq!(expr.key, "waterway");
        assert_eq!(expr.operator, Operator::Equal);
        assert_eq!(expr.values, vec![ValueMatch::Any]);
    }

    #[test]
    fn test_key_value() {
        let expr = parse_expression("natural=water").unwrap();
        assert_eq!(expr.key, "natural");
        assert_eq!(expr.values, vec![ValueMatch::Exact("water".into())]);
    }

    #[test]
    fn test_star_is_any_value() {
        let expr = parse_expression("landuse=*").unwrap();
        assert_eq!(expr.values, vec![ValueMatch::Any]);
    }

    #[test]
    fn test_value_list() {
        let expr = parse_expression("waterway=river,canal, stream").unwrap();
        assert_eq!(
            expr.values,
            vec![
                ValueMatch::Exact("river".into()),
                ValueMatch::Exact("canal".into()),
                ValueMatch::Exact("stream".into()),
            ]
        );
    }

    #[test]
    fn test_not_equal() {
        let expr = parse_expression("waterway!=ditch").unwrap();
        assert_eq!(expr.operator, Operator::NotEqual);
        assert_eq!(expr.values, vec![ValueMatch::Exact("ditch".into())]);
    }

    #[test]
    fn test_entity_prefix_is_dropped() {
        assert_eq!(
            parse_expression("w/waterway=river").unwrap(),
            parse_expression("waterway=river").unwrap()
        );
        assert_eq!(parse_expression("nwr/natural").unwrap().key, "natural");
    }

    #[test]
    fn test_prefix_without_key_is_an_error() {
        let err = parse_expression("w/").unwrap_err();
        assert!(err.contains("expected a tag key"), "{}", err);
    }

    #[test]
    fn test_key_starting_with_prefix_letters() {
        // "na" looks like a prefix until the missing slash.
        let expr = parse_expression("name:en=Rhine").unwrap();
        assert_eq!(expr.key, "name:en");
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let expr = parse_expression("  waterway = river ").unwrap();
        assert_eq!(expr.key, "waterway");
        assert_eq!(expr.values, vec![ValueMatch::Exact("river".into())]);
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("=river").is_err());
        assert!(parse_expression("waterway=").is_err());
        assert!(parse_expression("waterway=river,").is_err());
        assert!(parse_expression("waterway!river").is_err());
        assert!(parse_expression(" =x").is_err());
    }
}
