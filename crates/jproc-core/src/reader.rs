//! S-expression reader for update expressions.
//!
//! Lets a step write `"exp": "(u.substring test 1)"` instead of the JSON tree
//! `["u.substring", ["var", "test"], 1]`. Bare symbols in argument position
//! read site fields; `$value` and `$site` refer to the current value and the
//! site itself. `true`, `false` and `null` are keywords.

use serde_json::{Map, Value, json};
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Deepest nesting of lists, arrays and maps one expression may use.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReaderError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unbalanced parenthesis")]
    UnbalancedParenthesis,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("empty expression")]
    Empty,
    #[error("expression nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

#[derive(Debug, Clone)]
enum Val {
    Literal(Value),
    Symbol(String),
}

/// Read one expression. Several top-level forms are not allowed; the last
/// form would silently win otherwise.
pub fn read(input: &str) -> Result<Value, ReaderError> {
    let mut tokens = Tokenizer::new(input);
    let first = tokens.next_token()?.ok_or(ReaderError::Empty)?;
    let value = symbol_to_expr(parse_token(first, &mut tokens, 0)?);
    if let Some(extra) = tokens.next_token()? {
        return Err(ReaderError::UnexpectedChar(extra.lead_char()));
    }
    Ok(value)
}

fn symbol_to_expr(v: Val) -> Value {
    match v {
        Val::Literal(v) => v,
        Val::Symbol(s) => match s.as_str() {
            "true" => json!(true),
            "false" => json!(false),
            "null" => Value::Null,
            "$value" => json!(["value"]),
            "$site" => json!(["site"]),
            _ => json!(["var", s]),
        },
    }
}

fn parse_token(first: Token, tokens: &mut Tokenizer, depth: usize) -> Result<Val, ReaderError> {
    if matches!(first, Token::LParen | Token::LBracket | Token::LBrace) && depth >= MAX_DEPTH {
        return Err(ReaderError::TooDeep);
    }
    match first {
        Token::LParen => {
            let mut list = Vec::new();
            while let Some(t) = tokens.next_token()? {
                if t == Token::RParen {
                    return Ok(Val::Literal(Value::Array(list)));
                }
                let is_head = list.is_empty();
                let is_var_path = list.first().and_then(Value::as_str) == Some("var");
                let item = match parse_token(t, tokens, depth + 1)? {
                    // Operator names and `(var a.b)` paths stay plain strings.
                    Val::Symbol(s) if is_head || is_var_path => Value::String(s),
                    other => symbol_to_expr(other),
                };
                list.push(item);
            }
            Err(ReaderError::UnbalancedParenthesis)
        }
        Token::RParen | Token::RBracket => Err(ReaderError::UnbalancedParenthesis),
        Token::LBracket => {
            let mut list = Vec::new();
            while let Some(t) = tokens.next_token()? {
                if t == Token::RBracket {
                    return Ok(Val::Literal(Value::Array(list)));
                }
                list.push(symbol_to_expr(parse_token(t, tokens, depth + 1)?));
            }
            Err(ReaderError::UnbalancedParenthesis)
        }
        Token::LBrace => {
            let mut map = Map::new();
            while let Some(t) = tokens.next_token()? {
                match t {
                    Token::RBrace => return Ok(Val::Literal(Value::Object(map))),
                    Token::Symbol(key) | Token::String(key) => {
                        let val_token =
                            tokens.next_token()?.ok_or(ReaderError::UnexpectedChar('}'))?;
                        let val = symbol_to_expr(parse_token(val_token, tokens, depth + 1)?);
                        map.insert(key, val);
                    }
                    other => return Err(ReaderError::UnexpectedChar(other.lead_char())),
                }
            }
            Err(ReaderError::UnexpectedChar('}'))
        }
        Token::RBrace => Err(ReaderError::UnexpectedChar('}')),
        Token::String(s) => Ok(Val::Literal(Value::String(s))),
        Token::Number(n) => Ok(Val::Literal(n)),
        Token::Symbol(s) => Ok(Val::Symbol(s)),
    }
}

#[derive(Debug, PartialEq, Clone)]
enum Token {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    String(String),
    Number(Value),
    Symbol(String),
}

impl Token {
    fn lead_char(&self) -> char {
        match self {
            Token::LParen => '(',
            Token::RParen => ')',
            Token::LBrace => '{',
            Token::RBrace => '}',
            Token::LBracket => '[',
            Token::RBracket => ']',
            Token::String(_) => '"',
            Token::Number(n) => n.to_string().chars().next().unwrap_or('0'),
            Token::Symbol(s) => s.chars().next().unwrap_or('?'),
        }
    }
}

struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ReaderError> {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == ',' || c == ':' {
                self.chars.next();
                continue;
            }
            break;
        }

        let Some(c) = self.chars.next() else {
            return Ok(None);
        };

        match c {
            '(' => Ok(Some(Token::LParen)),
            ')' => Ok(Some(Token::RParen)),
            '{' => Ok(Some(Token::LBrace)),
            '}' => Ok(Some(Token::RBrace)),
            '[' => Ok(Some(Token::LBracket)),
            ']' => Ok(Some(Token::RBracket)),
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                let mut escaped = false;
                for nc in self.chars.by_ref() {
                    if escaped {
                        s.push(nc);
                        escaped = false;
                    } else if nc == '\\' {
                        escaped = true;
                    } else if nc == quote {
                        return Ok(Some(Token::String(s)));
                    } else {
                        s.push(nc);
                    }
                }
                Err(ReaderError::UnterminatedString)
            }
            _ if c.is_ascii_digit()
                || (c == '-' && self.chars.peek().is_some_and(|nc| nc.is_ascii_digit())) =>
            {
                let mut s = c.to_string();
                while let Some(&nc) = self.chars.peek() {
                    if nc.is_ascii_digit() || nc == '.' {
                        s.push(nc);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Some(Token::Number(parse_number(s)?)))
            }
            _ => {
                let mut s = c.to_string();
                while let Some(&nc) = self.chars.peek() {
                    if nc.is_whitespace() || "(){}[],:".contains(nc) {
                        break;
                    }
                    s.push(nc);
                    self.chars.next();
                }
                Ok(Some(Token::Symbol(s)))
            }
        }
    }
}

fn parse_number(s: String) -> Result<Value, ReaderError> {
    if let Ok(i) = s.parse::<i64>() {
        return Ok(json!(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or(ReaderError::InvalidNumber(s))
}
