use super::ExpressionError;

/// Multi-character symbols first so the longest match wins.
const SYMBOLS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "(", ")", "[", "]", ",", ".", "+", "-", "*", "/", "%",
    "<", ">", "|", "~",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    /// Raw text between `{` and `}`.
    Reference(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let (position, ch) = chars[index];

        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        if ch.is_ascii_digit() {
            let (token, next) = lex_number(source, &chars, index)?;
            tokens.push(Spanned { token, position });
            index = next;
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].1.is_alphanumeric() || chars[index].1 == '_') {
                index += 1;
            }
            let ident: String = chars[start..index].iter().map(|(_, c)| c).collect();
            tokens.push(Spanned {
                token: Token::Ident(ident),
                position,
            });
            continue;
        }

        if ch == '\'' || ch == '"' {
            let (text, next) = lex_string(&chars, index, ch)?;
            tokens.push(Spanned {
                token: Token::Str(text),
                position,
            });
            index = next;
            continue;
        }

        if ch == '{' {
            let close = chars[index..]
                .iter()
                .position(|(_, c)| *c == '}')
                .map(|offset| index + offset)
                .ok_or_else(|| syntax(position, "unterminated reference"))?;
            let reference: String = chars[index + 1..close].iter().map(|(_, c)| c).collect();
            let reference = reference.trim().to_string();
            if reference.is_empty() {
                return Err(syntax(position, "empty reference"));
            }
            tokens.push(Spanned {
                token: Token::Reference(reference),
                position,
            });
            index = close + 1;
            continue;
        }

        let rest = &source[position..];
        let symbol = *SYMBOLS
            .iter()
            .find(|symbol| rest.starts_with(**symbol))
            .ok_or_else(|| syntax(position, format!("unexpected character '{ch}'")))?;
        tokens.push(Spanned {
            token: Token::Symbol(symbol),
            position,
        });
        index += symbol.chars().count();
    }

    Ok(tokens)
}

fn lex_number(
    source: &str,
    chars: &[(usize, char)],
    start: usize,
) -> Result<(Token, usize), ExpressionError> {
    let digit_at = |i: usize| chars.get(i).is_some_and(|(_, c)| c.is_ascii_digit());
    let mut index = start;
    let mut is_float = false;

    while digit_at(index) {
        index += 1;
    }
    if chars.get(index).is_some_and(|(_, c)| *c == '.') && digit_at(index + 1) {
        is_float = true;
        index += 1;
        while digit_at(index) {
            index += 1;
        }
    }
    if chars.get(index).is_some_and(|(_, c)| *c == 'e' || *c == 'E') {
        let mut exponent = index + 1;
        if chars.get(exponent).is_some_and(|(_, c)| *c == '+' || *c == '-') {
            exponent += 1;
        }
        if digit_at(exponent) {
            is_float = true;
            index = exponent;
            while digit_at(index) {
                index += 1;
            }
        }
    }

    let begin = chars[start].0;
    let end = chars.get(index).map(|(pos, _)| *pos).unwrap_or(source.len());
    let text = &source[begin..end];
    let token = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| syntax(begin, format!("invalid number '{text}'")))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| syntax(begin, format!("integer '{text}' out of range")))?,
        )
    };
    Ok((token, index))
}

fn lex_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExpressionError> {
    let mut text = String::new();
    let mut index = start + 1;
    while let Some(&(_, ch)) = chars.get(index) {
        match ch {
            '\\' => {
                let (_, escaped) = chars
                    .get(index + 1)
                    .copied()
                    .ok_or_else(|| syntax(chars[start].0, "unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                index += 2;
            }
            c if c == quote => return Ok((text, index + 1)),
            c => {
                text.push(c);
                index += 1;
            }
        }
    }
    Err(syntax(chars[start].0, "unterminated string"))
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}
