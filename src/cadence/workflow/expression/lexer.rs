// SPDX-License-Identifier: MIT

//! Tokenizer for expression source text

use serde_json::{Number, Value};

use crate::kit::error::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(Value),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Contains,
    In,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A token together with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let spanned = |t: Token| Spanned { token: t, pos };

        let (token, width) = match (c, peek) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('>', Some('=')) => (Token::Gte, 2),
            ('<', Some('=')) => (Token::Lte, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('!', _) => (Token::Not, 1),
            ('>', _) => (Token::Gt, 1),
            ('<', _) => (Token::Lt, 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('\'', _) | ('"', _) => {
                let (s, consumed) = lex_string(&chars[i..], c, pos)?;
                tokens.push(Spanned {
                    token: Token::Str(s),
                    pos,
                });
                i += consumed;
                continue;
            }
            (d, _) if d.is_ascii_digit() => {
                // Directly after a dot this is a path segment, never a fraction
                let after_dot = matches!(tokens.last(), Some(Spanned { token: Token::Dot, .. }));
                let (value, consumed) = lex_number(&chars[i..], pos, after_dot)?;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    pos,
                });
                i += consumed;
                continue;
            }
            (a, _) if a.is_alphabetic() || a == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].1.is_alphanumeric() || chars[end].1 == '_') {
                    end += 1;
                }
                let word: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                tokens.push(spanned(keyword(word)));
                i = end;
                continue;
            }
            ('=', _) => {
                return Err(ExpressionError::syntax("single '=' (use '==')", pos));
            }
            (other, _) => {
                return Err(ExpressionError::syntax(
                    format!("unexpected character '{}'", other),
                    pos,
                ));
            }
        };

        tokens.push(spanned(token));
        i += width;
    }

    Ok(tokens)
}

fn keyword(word: String) -> Token {
    match word.as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "contains" => Token::Contains,
        "in" => Token::In,
        _ => Token::Ident(word),
    }
}

fn lex_string(
    chars: &[(usize, char)],
    quote: char,
    pos: usize,
) -> Result<(String, usize), ExpressionError> {
    let mut out = String::new();
    let mut i = 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            let escaped = chars
                .get(i + 1)
                .map(|(_, c)| *c)
                .ok_or_else(|| ExpressionError::syntax("unterminated escape", chars[i].0))?;
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Err(ExpressionError::syntax("unterminated string literal", pos))
}

fn lex_number(
    chars: &[(usize, char)],
    pos: usize,
    integer_only: bool,
) -> Result<(Value, usize), ExpressionError> {
    let mut i = 0;
    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    if !integer_only
        && i + 1 < chars.len()
        && chars[i].1 == '.'
        && chars[i + 1].1.is_ascii_digit()
    {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }

    let text: String = chars[..i].iter().map(|(_, c)| *c).collect();
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Ok((Value::from(n), i));
        }
    }
    let n: f64 = text
        .parse()
        .map_err(|_| ExpressionError::syntax(format!("invalid number '{}'", text), pos))?;
    let n = Number::from_f64(n)
        .ok_or_else(|| ExpressionError::syntax(format!("invalid number '{}'", text), pos))?;
    Ok((Value::Number(n), i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("amount >= 1000"),
            vec![
                Token::Ident("amount".to_string()),
                Token::Gte,
                Token::Number(json!(1000))
            ]
        );
    }

    #[test]
    fn test_tokenize_float_and_keywords() {
        assert_eq!(
            kinds("score > 0.8 and not done"),
            vec![
                Token::Ident("score".to_string()),
                Token::Gt,
                Token::Number(json!(0.8)),
                Token::And,
                Token::Not,
                Token::Ident("done".to_string()),
            ]
        );
    }

    #[test]
    fn test_numeric_path_segment_is_not_a_fraction() {
        assert_eq!(
            kinds("items.0.sku"),
            vec![
                Token::Ident("items".to_string()),
                Token::Dot,
                Token::Number(json!(0)),
                Token::Dot,
                Token::Ident("sku".to_string()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb""#),
            vec![
                Token::Str("it's".to_string()),
                Token::Str("a\nb".to_string())
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("name == 'abc").unwrap_err();
        assert!(matches!(err, ExpressionError::Syntax { position: 8, .. }));
    }

    #[test]
    fn test_single_equals_rejected() {
        assert!(tokenize("a = 1").is_err());
    }
}
