//! Tokenizer for the expression grammar.

use crate::ExpressionError;

/// One lexical token of an expression fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Identifiers, including the `$`-prefixed context roots.
    Ident(String),
    True,
    False,
    Null,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Question,
    Colon,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
}

/// Tokenize `fragment` into a flat token stream.
pub fn tokenize(fragment: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = fragment.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,

            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            '[' => { tokens.push(Token::LBracket); i += 1; }
            ']' => { tokens.push(Token::RBracket); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '?' => { tokens.push(Token::Question); i += 1; }
            ':' => { tokens.push(Token::Colon); i += 1; }
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '%' => { tokens.push(Token::Percent); i += 1; }

            '.' => {
                // A dot starting a number (`.5`) is part of the literal.
                if chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    let (value, next) = lex_number(fragment, &chars, i)?;
                    tokens.push(Token::Number(value));
                    i = next;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }

            '=' => {
                // Accept both `==` and `===`.
                if chars.get(i + 1) == Some(&'=') {
                    i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                    tokens.push(Token::EqEq);
                } else {
                    return Err(ExpressionError::syntax(fragment, "assignment is not allowed"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::LtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::GtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(ExpressionError::syntax(fragment, "unexpected '&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(ExpressionError::syntax(fragment, "unexpected '|'"));
                }
            }

            '\'' | '"' => {
                let (text, next) = lex_string(fragment, &chars, i)?;
                tokens.push(Token::Str(text));
                i = next;
            }

            _ if c.is_ascii_digit() => {
                let (value, next) = lex_number(fragment, &chars, i)?;
                tokens.push(Token::Number(value));
                i = next;
            }

            _ if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }

            other => {
                return Err(ExpressionError::syntax(
                    fragment,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn lex_number(
    fragment: &str,
    chars: &[char],
    start: usize,
) -> Result<(f64, usize), ExpressionError> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        i += 1;
        if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
            i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }

    let text: String = chars[start..i].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| ExpressionError::syntax(fragment, format!("invalid number '{text}'")))?;
    Ok((value, i))
}

fn lex_string(
    fragment: &str,
    chars: &[char],
    start: usize,
) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((text, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ExpressionError::syntax(fragment, "unterminated escape"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    other => *other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(ExpressionError::syntax(fragment, "unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_and_literals() {
        let tokens = tokenize("1 + 2.5 >= 'a' && !done").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.0),
                Token::Plus,
                Token::Number(2.5),
                Token::GtEq,
                Token::Str("a".into()),
                Token::AndAnd,
                Token::Not,
                Token::Ident("done".into()),
            ]
        );
    }

    #[test]
    fn context_roots_lex_as_identifiers() {
        let tokens = tokenize(r#"$node["Fetch"].items[0]"#).unwrap();
        assert_eq!(tokens[0], Token::Ident("$node".into()));
        assert_eq!(tokens[1], Token::LBracket);
        assert_eq!(tokens[2], Token::Str("Fetch".into()));
    }

    #[test]
    fn strict_equality_aliases_to_equality() {
        assert_eq!(
            tokenize("a === b").unwrap(),
            vec![Token::Ident("a".into()), Token::EqEq, Token::Ident("b".into())]
        );
    }

    #[test]
    fn assignment_is_rejected() {
        assert!(tokenize("a = 1").is_err());
    }

    #[test]
    fn unterminated_string_is_rejected() {
        assert!(tokenize("'oops").is_err());
    }
}
