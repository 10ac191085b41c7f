//! Expression grammar using nom.
//!
//! Precedence, lowest first:
//! - `??` (default for null/absent)
//! - `||` / `OR`
//! - `&&` / `AND`
//! - comparisons, `IS [NOT] NULL`, `[NOT] IN` (non-associative)
//! - `!` / `NOT`

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::{CompareOp, Expr, Function};
use crate::value::Value;

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "is", "null", "true", "false"];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Match a case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_char)))
}

/// Parse a complete expression.
pub fn parse_expression(input: &str) -> IResult<&str, Expr> {
    chain(input, parse_or, coalesce_op, Expr::Coalesce)
}

/// Fold a left-associative chain of one binary operator.
fn chain<'a>(
    input: &'a str,
    operand: fn(&str) -> IResult<&str, Expr>,
    operator: fn(&str) -> IResult<&str, ()>,
    build: fn(Box<Expr>, Box<Expr>) -> Expr,
) -> IResult<&'a str, Expr> {
    let (mut input, mut left) = operand(input)?;
    loop {
        match operator(input) {
            Ok((rest, ())) => {
                let (rest, right) = operand(rest)?;
                left = build(Box::new(left), Box::new(right));
                input = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((input, left)),
            Err(e) => return Err(e),
        }
    }
}

fn coalesce_op(input: &str) -> IResult<&str, ()> {
    value((), preceded(multispace0, tag("??")))(input)
}

fn or_op(input: &str) -> IResult<&str, ()> {
    value((), preceded(multispace0, alt((tag("||"), keyword("or")))))(input)
}

fn and_op(input: &str) -> IResult<&str, ()> {
    value((), preceded(multispace0, alt((tag("&&"), keyword("and")))))(input)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    chain(input, parse_and, or_op, Expr::Or)
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    chain(input, parse_comparison, and_op, Expr::And)
}

/// Parse a comparison, null test or membership test.
fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_unary(input)?;
    let (rest, _) = multispace0(input)?;

    if let Ok((rest, negated)) = is_null_suffix(rest) {
        return Ok((
            rest,
            Expr::IsNull {
                operand: Box::new(left),
                negated,
            },
        ));
    }

    if let Ok((rest, negated)) = in_op(rest) {
        let (rest, haystack) = parse_unary(rest)?;
        return Ok((
            rest,
            Expr::In {
                needle: Box::new(left),
                haystack: Box::new(haystack),
                negated,
            },
        ));
    }

    if let Ok((rest, op)) = compare_op(rest) {
        let (rest, right) = parse_unary(rest)?;
        return Ok((
            rest,
            Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        ));
    }

    Ok((input, left))
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Ne, tag("<>")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Eq, tag("=")),
    ))(input)
}

/// Parse `IS NULL` / `IS NOT NULL`, returning whether it was negated.
fn is_null_suffix(input: &str) -> IResult<&str, bool> {
    let (input, _) = keyword("is")(input)?;
    let (input, _) = multispace0(input)?;
    let (input, negated) = opt(terminated(keyword("not"), multispace0))(input)?;
    let (input, _) = keyword("null")(input)?;
    Ok((input, negated.is_some()))
}

/// Parse `IN` / `NOT IN`, returning whether it was negated.
fn in_op(input: &str) -> IResult<&str, bool> {
    let (input, negated) = opt(terminated(keyword("not"), multispace0))(input)?;
    let (input, _) = keyword("in")(input)?;
    Ok((input, negated.is_some()))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    let bang = value((), terminated(char('!'), not(char('='))));
    let not_kw = value((), keyword("not"));
    if let Ok((rest, ())) = alt((bang, not_kw))(input) {
        let (rest, operand) = parse_unary(rest)?;
        return Ok((rest, Expr::Not(Box::new(operand))));
    }
    parse_primary(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((parse_group, parse_list, parse_literal, parse_call_or_path))(input)
}

fn parse_group(input: &str) -> IResult<&str, Expr> {
    delimited(
        char('('),
        parse_expression,
        preceded(multispace0, char(')')),
    )(input)
}

/// Parse a list literal: `[1, 2, 'three']`.
fn parse_list(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('[')(input)?;
    let (input, items) =
        separated_list0(preceded(multispace0, char(',')), parse_expression)(input)?;
    let (input, _) = preceded(multispace0, char(']'))(input)?;
    Ok((input, Expr::List(items)))
}

fn parse_literal(input: &str) -> IResult<&str, Expr> {
    let (input, v) = alt((
        value(Value::Null, keyword("null")),
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        parse_number,
        parse_quoted_string,
    ))(input)?;
    Ok((input, Expr::Literal(v)))
}

/// Parse a number (integer or float).
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, num_str) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    let parsed = if num_str.contains('.') {
        num_str.parse().map(Value::Float).ok()
    } else {
        num_str.parse().map(Value::Int).ok()
    };
    match parsed {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Failure(Error::new(input, ErrorKind::Digit))),
    }
}

/// Parse a single- or double-quoted string.
fn parse_quoted_string(input: &str) -> IResult<&str, Value> {
    let (input, content) = alt((
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
    ))(input)?;
    Ok((input, Value::String(content.to_string())))
}

/// Parse a dotted path such as `user.address.city`.
fn parse_path(input: &str) -> IResult<&str, &str> {
    let (rest, path) = recognize(pair(
        pair(satisfy(is_ident_start), take_while(is_ident_char)),
        many0(pair(char('.'), take_while1(is_ident_char))),
    ))(input)?;
    if KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(path)) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, path))
}

/// Parse a function call or a plain reference.
fn parse_call_or_path(input: &str) -> IResult<&str, Expr> {
    let (rest, path) = parse_path(input)?;
    let Ok((after_paren, _)) = preceded(multispace0, char::<&str, Error<&str>>('('))(rest) else {
        return Ok((rest, Expr::Ref(path.to_string())));
    };

    let Some(function) = Function::from_name(path) else {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
    };
    let (after_args, args) =
        separated_list0(preceded(multispace0, char(',')), parse_expression)(after_paren)?;
    let (after_call, _) = preceded(multispace0, char(')'))(after_args)?;
    if args.len() != 1 {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Count)));
    }
    Ok((
        after_call,
        Expr::Call {
            function,
            args,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        let (rest, expr) = parse_expression(input).unwrap();
        assert!(rest.trim().is_empty(), "trailing input: {:?}", rest);
        expr
    }

    #[test]
    fn test_reference() {
        assert_eq!(parse("user.name"), Expr::Ref("user.name".to_string()));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("a || b && c");
        assert_eq!(
            expr,
            Expr::Or(
                Box::new(Expr::Ref("a".into())),
                Box::new(Expr::And(
                    Box::new(Expr::Ref("b".into())),
                    Box::new(Expr::Ref("c".into())),
                )),
            )
        );
    }

    #[test]
    fn test_not_binds_tighter_than_comparison() {
        let expr = parse("!a == b");
        assert_eq!(
            expr,
            Expr::Compare {
                op: CompareOp::Eq,
                left: Box::new(Expr::Not(Box::new(Expr::Ref("a".into())))),
                right: Box::new(Expr::Ref("b".into())),
            }
        );
    }

    #[test]
    fn test_keyword_operators() {
        let expr = parse("a AND NOT b OR c");
        assert!(matches!(expr, Expr::Or(_, _)));
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(parse("order_id"), Expr::Ref("order_id".into()));
        assert_eq!(parse("notes"), Expr::Ref("notes".into()));
        assert_eq!(parse("nullable"), Expr::Ref("nullable".into()));
    }

    #[test]
    fn test_is_not_null() {
        assert_eq!(
            parse("name IS NOT NULL"),
            Expr::IsNull {
                operand: Box::new(Expr::Ref("name".into())),
                negated: true,
            }
        );
    }

    #[test]
    fn test_not_in_list() {
        assert_eq!(
            parse("status not in ['a', 'b']"),
            Expr::In {
                needle: Box::new(Expr::Ref("status".into())),
                haystack: Box::new(Expr::List(vec![
                    Expr::Literal(Value::from("a")),
                    Expr::Literal(Value::from("b")),
                ])),
                negated: true,
            }
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("-12"), Expr::Literal(Value::Int(-12)));
        assert_eq!(parse("1.25"), Expr::Literal(Value::Float(1.25)));
        assert_eq!(parse("\"x\""), Expr::Literal(Value::from("x")));
        assert_eq!(parse("NULL"), Expr::Literal(Value::Null));
        assert_eq!(parse("[]"), Expr::List(vec![]));
    }

    #[test]
    fn test_function_call() {
        assert_eq!(
            parse("SF.isNotEmpty(name)"),
            Expr::Call {
                function: Function::IsNotEmpty,
                args: vec![Expr::Ref("name".into())],
            }
        );
    }

    #[test]
    fn test_unknown_function_fails() {
        assert!(matches!(
            parse_expression("explode(name)"),
            Err(nom::Err::Failure(_))
        ));
    }

    #[test]
    fn test_comparison_does_not_chain() {
        let (rest, _) = parse_expression("a < b < c").unwrap();
        assert_eq!(rest.trim(), "< c");
    }
}
