//! Expression tokenizer.
//!
//! Identifiers are sensor keys, so `:` and `.` are identifier characters
//! (`input:pump.flow_rate`). The word forms `and`, `or`, `not` lex to the
//! same tokens as `&&`, `||`, `!`.

use super::ExprParseError;

/// A lexed token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Gt,
    Lt,
    Ge,
    Le,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '.'
}

/// Tokenize an expression source string.
pub fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprParseError> {
    let bytes: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let mut end = i;
            let mut seen_dot = false;
            let mut seen_exp = false;
            while end < bytes.len() {
                let d = bytes[end];
                if d.is_ascii_digit() {
                    end += 1;
                } else if d == '.' && !seen_dot && !seen_exp {
                    // A dot followed by an identifier char is a key separator,
                    // not a decimal point.
                    if bytes.get(end + 1).is_some_and(|n| n.is_ascii_digit()) {
                        seen_dot = true;
                        end += 1;
                    } else {
                        break;
                    }
                } else if (d == 'e' || d == 'E') && !seen_exp {
                    let next = bytes.get(end + 1);
                    let after_sign = bytes.get(end + 2);
                    let exp_digits = match next {
                        Some('+') | Some('-') => after_sign.is_some_and(|n| n.is_ascii_digit()),
                        Some(n) => n.is_ascii_digit(),
                        None => false,
                    };
                    if exp_digits {
                        seen_exp = true;
                        end += if matches!(next, Some('+') | Some('-')) { 2 } else { 1 };
                    } else {
                        break;
                    }
                } else {
                    break;
                }
            }
            let text: String = bytes[i..end].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ExprParseError::new(format!("invalid number '{text}'"), start))?;
            tokens.push((Token::Number(value), start));
            i = end;
            continue;
        }

        if is_ident_start(c) {
            let mut end = i;
            while end < bytes.len() && is_ident_continue(bytes[end]) {
                end += 1;
            }
            let text: String = bytes[i..end].iter().collect();
            let token = match text.as_str() {
                "and" => Token::AndAnd,
                "or" => Token::OrOr,
                "not" => Token::Bang,
                _ => Token::Ident(text),
            };
            tokens.push((token, start));
            i = end;
            continue;
        }

        let two: Option<char> = bytes.get(i + 1).copied();
        let token = match (c, two) {
            ('>', Some('=')) => {
                i += 2;
                Token::Ge
            }
            ('<', Some('=')) => {
                i += 2;
                Token::Le
            }
            ('=', Some('=')) => {
                i += 2;
                Token::EqEq
            }
            ('!', Some('=')) => {
                i += 2;
                Token::NotEq
            }
            ('<', Some('>')) => {
                i += 2;
                Token::NotEq
            }
            ('&', Some('&')) => {
                i += 2;
                Token::AndAnd
            }
            ('|', Some('|')) => {
                i += 2;
                Token::OrOr
            }
            ('>', _) => {
                i += 1;
                Token::Gt
            }
            ('<', _) => {
                i += 1;
                Token::Lt
            }
            // Bare '=' is accepted and canonicalized to equality.
            ('=', _) => {
                i += 1;
                Token::EqEq
            }
            ('!', _) => {
                i += 1;
                Token::Bang
            }
            ('+', _) => {
                i += 1;
                Token::Plus
            }
            ('-', _) => {
                i += 1;
                Token::Minus
            }
            ('*', _) => {
                i += 1;
                Token::Star
            }
            ('/', _) => {
                i += 1;
                Token::Slash
            }
            ('(', _) => {
                i += 1;
                Token::LParen
            }
            (')', _) => {
                i += 1;
                Token::RParen
            }
            (',', _) => {
                i += 1;
                Token::Comma
            }
            _ => {
                return Err(ExprParseError::new(
                    format!("unexpected character '{c}'"),
                    start,
                ))
            }
        };
        tokens.push((token, start));
    }

    Ok(tokens)
}
