//! Classification of block-comment bodies into directives.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, multispace1, satisfy},
    combinator::{all_consuming, recognize, rest},
    multi::many0,
    sequence::{delimited, pair, tuple},
    IResult,
};

use crate::error::{TwoSqlError, TwoSqlResult};
use crate::expr::Expression;

/// A recognized directive comment.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Directive {
    Bind(String),
    ParenBind(String),
    Embedded(Expression),
    If(Expression),
    ElseIf(Expression),
    Else,
    End,
    Begin,
    For {
        variable: String,
        collection: Expression,
    },
}

impl Directive {
    /// Whether a placeholder literal follows this directive in the source.
    pub(super) fn takes_dummy(&self) -> bool {
        matches!(
            self,
            Directive::Bind(_) | Directive::ParenBind(_) | Directive::Embedded(_)
        )
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

/// `name` or `name.member.0`
fn bind_path(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        identifier,
        many0(pair(char('.'), take_while1(is_ident_char))),
    ))(input)
}

/// `v IN expr` or `v : expr`
fn for_header(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, (_, variable, _, collection)) = tuple((
        multispace0,
        identifier,
        alt((
            delimited(multispace1, tag_no_case("IN"), multispace1),
            delimited(multispace0, tag(":"), multispace0),
        )),
        rest,
    ))(input)?;
    Ok((input, (variable, collection)))
}

/// Classify a comment body. `Ok(None)` means an ordinary comment.
pub(super) fn classify(body: &str, position: usize) -> TwoSqlResult<Option<Directive>> {
    if let Some(name) = body.strip_prefix('#') {
        return bind_name(name, position).map(|n| Some(Directive::Bind(n)));
    }
    if let Some(expr) = body.strip_prefix('$') {
        return expression(expr, "$", position).map(|e| Some(Directive::Embedded(e)));
    }
    if let Some(name) = body.strip_prefix("PAREN#") {
        return bind_name(name, position).map(|n| Some(Directive::ParenBind(n)));
    }

    let word_len = body
        .find(|c: char| !is_ident_char(c))
        .unwrap_or(body.len());
    let (word, args) = body.split_at(word_len);
    let is_keyword_like = word.starts_with(|c: char| c.is_ascii_uppercase())
        && !word.chars().any(|c| c.is_lowercase());
    if !is_keyword_like {
        return Ok(None);
    }

    let directive = match word {
        "IF" => Directive::If(expression(args, word, position)?),
        "ELSEIF" | "ELIF" => Directive::ElseIf(expression(args, word, position)?),
        "ELSE" => bare(Directive::Else, args, word, position)?,
        "END" => bare(Directive::End, args, word, position)?,
        "BEGIN" => bare(Directive::Begin, args, word, position)?,
        "FOR" => {
            let (_, (variable, collection)) = for_header(args).map_err(|_| {
                TwoSqlError::syntax(position, "malformed FOR header, expected 'FOR var IN expr'")
            })?;
            Directive::For {
                variable: variable.to_string(),
                collection: expression(collection, word, position)?,
            }
        }
        other => {
            return Err(TwoSqlError::syntax(
                position,
                format!("unknown directive '{}'", other),
            ));
        }
    };
    Ok(Some(directive))
}

fn bind_name(name: &str, position: usize) -> TwoSqlResult<String> {
    let name = name.trim();
    all_consuming(bind_path)(name)
        .map(|(_, path)| path.to_string())
        .map_err(|_| TwoSqlError::syntax(position, format!("invalid bind name '{}'", name)))
}

fn expression(source: &str, directive: &str, position: usize) -> TwoSqlResult<Expression> {
    let source = source.trim();
    if source.is_empty() {
        return Err(TwoSqlError::syntax(
            position,
            format!("{} requires an expression", directive),
        ));
    }
    Expression::parse(source)
}

fn bare(directive: Directive, args: &str, word: &str, position: usize) -> TwoSqlResult<Directive> {
    if args.trim().is_empty() {
        Ok(directive)
    } else {
        Err(TwoSqlError::syntax(
            position,
            format!("{} takes no arguments", word),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_comments() {
        assert_eq!(classify(" note ", 0).unwrap(), None);
        assert_eq!(classify("+ INDEX(t idx) ", 0).unwrap(), None);
        assert_eq!(classify("lowercase words", 0).unwrap(), None);
        assert_eq!(classify("", 0).unwrap(), None);
    }

    #[test]
    fn test_binds() {
        assert_eq!(
            classify("#user.id", 0).unwrap(),
            Some(Directive::Bind("user.id".to_string()))
        );
        assert_eq!(
            classify("PAREN#ids", 0).unwrap(),
            Some(Directive::ParenBind("ids".to_string()))
        );
        assert!(classify("#1abc", 3).is_err());
        assert!(classify("#", 3).is_err());
    }

    #[test]
    fn test_for_header() {
        let Some(Directive::For { variable, collection }) = classify("FOR item IN items", 0).unwrap()
        else {
            panic!("expected FOR");
        };
        assert_eq!(variable, "item");
        assert_eq!(collection.source(), "items");

        let Some(Directive::For { variable, .. }) = classify("FOR x : xs", 0).unwrap() else {
            panic!("expected FOR");
        };
        assert_eq!(variable, "x");
        assert!(classify("FOR items", 0).is_err());
    }

    #[test]
    fn test_keywords() {
        assert_eq!(classify("END", 0).unwrap(), Some(Directive::End));
        assert_eq!(classify("BEGIN", 0).unwrap(), Some(Directive::Begin));
        assert!(matches!(classify("ELIF a", 0).unwrap(), Some(Directive::ElseIf(_))));
        assert!(matches!(classify("IF(a)", 0).unwrap(), Some(Directive::If(_))));
    }

    #[test]
    fn test_errors() {
        let err = classify("WHILE x", 12).unwrap_err();
        assert!(matches!(err, TwoSqlError::TemplateSyntax { position: 12, .. }));
        assert!(classify("IF", 0).is_err());
        assert!(classify("END x", 0).is_err());
        assert!(matches!(
            classify("IF a ==", 0).unwrap_err(),
            TwoSqlError::ExpressionSyntax { .. }
        ));
    }
}
