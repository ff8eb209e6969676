//! Purpose: Decode the textual encodings of a table specification into JSON values.
//! Exports: `parse_spec_text`, `looks_structured`.
//! Role: Pure parser used by the normalizer; performs no I/O.
//! Invariants: JSON object text is tried first, then the keyword-map literal form.
//! Invariants: Keyword keys drop their leading `:`; symbols decode as strings.
//! Invariants: Commas are whitespace; `;` starts a comment that runs to end of line.

use serde_json::{Map, Number, Value};

use crate::core::error::{Error, ErrorKind};

/// True when `text` is shaped like an attempted structured spec rather than a location.
pub fn looks_structured(text: &str) -> bool {
    text.trim_start().starts_with('{')
}

/// Parses `text` as a structured specification map.
pub fn parse_spec_text(text: &str) -> Result<Map<String, Value>, Error> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Ok(map);
    }

    let mut parser = Parser::new(text);
    parser.skip_ignored();
    let value = parser.parse_value()?;
    parser.skip_ignored();
    if let Some((offset, ch)) = parser.peek_indexed() {
        return Err(parser.error_at(offset, format!("unexpected trailing `{ch}`")));
    }
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::new(ErrorKind::InvalidSpec)
            .with_message("structured spec must be a map")
            .with_hint("Use a form like {:kind delimited :location \"data.tab\"}.")),
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_indexed(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(offset, _)| *offset)
            .unwrap_or(self.text.len())
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next().map(|(_, ch)| ch)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::InvalidSpec)
            .with_message(format!("{} at offset {offset}", message.into()))
            .with_hint("Structured specs look like {:kind fixed-width :location \"t.txt\" :widths [4 8]}.")
    }

    fn skip_ignored(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == ',' {
                self.bump();
            } else if ch == ';' {
                while let Some(ch) = self.bump() {
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value, Error> {
        let offset = self.offset();
        match self.peek() {
            None => Err(self.error_at(offset, "unexpected end of input")),
            Some('{') => self.parse_map(),
            Some('[') => self.parse_seq(']'),
            Some('(') => self.parse_seq(')'),
            Some('"') => self.parse_string().map(Value::String),
            Some(':') => {
                self.bump();
                let name = self.take_token();
                if name.is_empty() {
                    return Err(self.error_at(offset, "empty keyword"));
                }
                Ok(Value::String(name))
            }
            Some(ch) if is_token_char(ch) => {
                let token = self.take_token();
                Ok(token_value(&token))
            }
            Some(ch) => Err(self.error_at(offset, format!("unexpected `{ch}`"))),
        }
    }

    fn parse_map(&mut self) -> Result<Value, Error> {
        let open = self.offset();
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ignored();
            match self.peek() {
                None => return Err(self.error_at(open, "unterminated map")),
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                Some(_) => {}
            }
            let key_offset = self.offset();
            let key = match self.parse_value()? {
                Value::String(key) => key,
                other => {
                    return Err(self.error_at(key_offset, format!("map key must be a name, got {other}")));
                }
            };
            self.skip_ignored();
            if matches!(self.peek(), None | Some('}')) {
                return Err(self.error_at(key_offset, format!("missing value for key `{key}`")));
            }
            let value = self.parse_value()?;
            map.insert(key, value);
        }
    }

    fn parse_seq(&mut self, close: char) -> Result<Value, Error> {
        let open = self.offset();
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ignored();
            match self.peek() {
                None => return Err(self.error_at(open, "unterminated list")),
                Some(ch) if ch == close => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                Some(_) => items.push(self.parse_value()?),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, Error> {
        let open = self.offset();
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error_at(open, "unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escape_offset = self.offset();
                    match self.bump() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('r') => out.push('\r'),
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some(other) => {
                            return Err(self.error_at(escape_offset, format!("unknown escape `\\{other}`")));
                        }
                        None => return Err(self.error_at(open, "unterminated string")),
                    }
                }
                Some(ch) => out.push(ch),
            }
        }
    }

    fn take_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(ch) = self.peek() {
            if !is_token_char(ch) {
                break;
            }
            token.push(ch);
            self.bump();
        }
        token
    }
}

fn is_token_char(ch: char) -> bool {
    !(ch.is_whitespace() || matches!(ch, ',' | ';' | '"' | '{' | '}' | '[' | ']' | '(' | ')'))
}

fn token_value(token: &str) -> Value {
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "nil" | "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = token.parse::<i64>() {
        return Value::Number(int.into());
    }
    if token.contains('.') {
        if let Some(number) = token.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    Value::String(token.to_string())
}
