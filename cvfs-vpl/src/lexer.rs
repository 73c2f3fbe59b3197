//! Line lexer. VPL is line oriented, so each source line is tokenized on its
//! own; indentation is measured separately by the parser.

use crate::error::{VplError, VplResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Assign,
    Gt,
    Colon,
}

/// Width of the leading whitespace; a tab counts as four columns
pub fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Tokenize one line. A `#` outside a string starts a comment.
pub fn tokenize(line: &str) -> VplResult<Vec<Token>> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '#' => break,
            '(' => push(&mut tokens, &mut i, Token::LParen),
            ')' => push(&mut tokens, &mut i, Token::RParen),
            '[' => push(&mut tokens, &mut i, Token::LBracket),
            ']' => push(&mut tokens, &mut i, Token::RBracket),
            ',' => push(&mut tokens, &mut i, Token::Comma),
            '.' if !next_is_digit(&chars, i) => push(&mut tokens, &mut i, Token::Dot),
            '=' => push(&mut tokens, &mut i, Token::Assign),
            '>' => push(&mut tokens, &mut i, Token::Gt),
            ':' => push(&mut tokens, &mut i, Token::Colon),
            '"' => {
                let (s, next) = string_literal(&chars, i + 1)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() || c == '.' || (c == '-' && starts_number(&chars, i + 1)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E'))
                    || (i < chars.len() && matches!(chars[i], '-' | '+') && matches!(chars[i - 1], 'e' | 'E'))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| VplError::InvalidNumber { text: text.clone() })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(VplError::UnexpectedChar { ch: other, col: i + 1 }),
        }
    }
    Ok(tokens)
}

fn push(tokens: &mut Vec<Token>, i: &mut usize, token: Token) {
    tokens.push(token);
    *i += 1;
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).map_or(false, |c| c.is_ascii_digit())
}

fn starts_number(chars: &[char], i: usize) -> bool {
    match chars.get(i) {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => next_is_digit(chars, i),
        _ => false,
    }
}

/// Read a string body starting after the opening quote. Returns the text and
/// the index after the closing quote.
fn string_literal(chars: &[char], mut i: usize) -> VplResult<(String, usize)> {
    let mut out = String::new();
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or(VplError::UnterminatedString)?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(VplError::UnterminatedString)
}
