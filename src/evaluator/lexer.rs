use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Longest punctuators first so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", "%=", "(", ")",
    "{", "}", "[", "]", ",", ";", ".", ":", "!", "<", ">", "+", "-", "*", "/", "%", "?", "=",
];

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, EvalError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if source[pos..].starts_with("//") {
            pos = source[pos..].find('\n').map_or(bytes.len(), |n| pos + n);
            continue;
        }

        if source[pos..].starts_with("/*") {
            let end = source[pos + 2..]
                .find("*/")
                .ok_or_else(|| syntax(source, pos, "unterminated comment"))?;
            pos += end + 4;
            continue;
        }

        let start = pos;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let (value, len) = lex_number(&source[pos..]).ok_or_else(|| syntax(source, pos, "invalid number"))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                offset: start,
            });
            pos += len;
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (value, len) = lex_string(&source[pos..]).map_err(|msg| syntax(source, pos, msg))?;
            tokens.push(Spanned {
                token: Token::Str(value),
                offset: start,
            });
            pos += len;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let len = source[pos..]
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                .unwrap_or(bytes.len() - pos);
            tokens.push(Spanned {
                token: Token::Ident(source[pos..pos + len].to_string()),
                offset: start,
            });
            pos += len;
            continue;
        }

        match PUNCTUATORS.iter().find(|p| source[pos..].starts_with(**p)) {
            Some(punct) => {
                tokens.push(Spanned {
                    token: Token::Punct(*punct),
                    offset: start,
                });
                pos += punct.len();
            }
            None => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(syntax(source, pos, &format!("unexpected character '{}'", ch)));
            }
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: bytes.len(),
    });
    Ok(tokens)
}

fn lex_number(input: &str) -> Option<(f64, usize)> {
    let bytes = input.as_bytes();
    let mut len = 0;
    while len < bytes.len() && bytes[len].is_ascii_digit() {
        len += 1;
    }
    if len < bytes.len() && bytes[len] == b'.' {
        len += 1;
        while len < bytes.len() && bytes[len].is_ascii_digit() {
            len += 1;
        }
    }
    if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
        let mut exp = len + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            len = exp;
        }
    }
    input[..len].parse().ok().map(|value| (value, len))
}

fn lex_string(input: &str) -> Result<(String, usize), &'static str> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err("unterminated string"),
    };
    let mut out = String::new();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, idx + 1)),
            '\n' => return Err("unterminated string"),
            '\\' => {
                let (_, escaped) = chars.next().ok_or("unterminated string")?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    '0' => out.push('\0'),
                    'u' => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let (_, digit) = chars.next().ok_or("invalid unicode escape")?;
                            code = code * 16 + digit.to_digit(16).ok_or("invalid unicode escape")?;
                        }
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }

    Err("unterminated string")
}

fn syntax(source: &str, offset: usize, message: &str) -> EvalError {
    EvalError::Compile {
        function: source.to_string(),
        message: format!("{} at offset {}", message, offset),
    }
}
