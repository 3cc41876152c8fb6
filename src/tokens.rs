//! Lazy, forward-only JSON token stream.
//!
//! The document is never materialized: callers walk the top level one key
//! at a time and either skip a value or build a [`Value`] for one bounded
//! sub-tree (a single provider reference or a single `in_network` item).

use json_event_parser::{JsonEvent, ReaderJsonParser};
use serde_json::{Map, Value};
use std::io::Read;

use crate::{
    constants::MAX_VALUE_DEPTH,
    error::{ExtractError, ExtractResult},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    Key(String),
    String(String),
    Number(String),
    Bool(bool),
    Null,
    Eof,
}

pub struct TokenStream<R: Read> {
    parser: ReaderJsonParser<R>,
}

impl<R: Read> TokenStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            parser: ReaderJsonParser::new(reader),
        }
    }

    pub fn next_token(&mut self) -> ExtractResult<Token> {
        let token = match self.parser.parse_next()? {
            JsonEvent::StartObject => Token::StartObject,
            JsonEvent::EndObject => Token::EndObject,
            JsonEvent::StartArray => Token::StartArray,
            JsonEvent::EndArray => Token::EndArray,
            JsonEvent::ObjectKey(key) => Token::Key(key.into_owned()),
            JsonEvent::String(s) => Token::String(s.into_owned()),
            JsonEvent::Number(n) => Token::Number(n.into_owned()),
            JsonEvent::Boolean(b) => Token::Bool(b),
            JsonEvent::Null => Token::Null,
            JsonEvent::Eof => Token::Eof,
        };
        Ok(token)
    }

    /// Consumes the opening brace of the document root.
    pub fn begin_root(&mut self) -> ExtractResult<()> {
        match self.next_token()? {
            Token::StartObject => Ok(()),
            Token::Eof => Err(ExtractError::UnrecognizedSchema(
                "document is empty".to_string(),
            )),
            other => Err(ExtractError::UnrecognizedSchema(format!(
                "document root is not an object (found {})",
                describe(&other)
            ))),
        }
    }

    /// Next key of the object currently open, or `None` once it closes.
    pub fn next_key(&mut self) -> ExtractResult<Option<String>> {
        match self.next_token()? {
            Token::Key(key) => Ok(Some(key)),
            Token::EndObject => Ok(None),
            other => Err(unexpected(&other, "an object key")),
        }
    }

    /// Consumes the opening bracket of an array value. A `null` section is
    /// read as an empty one and yields `false`.
    pub fn begin_array(&mut self, section: &str) -> ExtractResult<bool> {
        match self.next_token()? {
            Token::StartArray => Ok(true),
            Token::Null => Ok(false),
            other => Err(unexpected(&other, &format!("an array for {section}"))),
        }
    }

    /// First token of the next array element, or `None` at the closing bracket.
    pub fn next_item(&mut self) -> ExtractResult<Option<Token>> {
        match self.next_token()? {
            Token::EndArray => Ok(None),
            Token::Eof => Err(unexpected(&Token::Eof, "an array element")),
            token => Ok(Some(token)),
        }
    }

    /// Checks that nothing but whitespace follows the closed root object.
    pub fn end_document(&mut self) -> ExtractResult<()> {
        match self.next_token()? {
            Token::Eof => Ok(()),
            other => Err(unexpected(&other, "end of document")),
        }
    }

    pub fn skip_value(&mut self) -> ExtractResult<()> {
        let first = self.next_token()?;
        self.skip_from(first)
    }

    /// Skips the value that begins with `first`, without allocating it.
    pub fn skip_from(&mut self, first: Token) -> ExtractResult<()> {
        self.skip_from_while(first, || true).map(|_| ())
    }

    /// Skips the next value, checking `keep_going` before every token inside
    /// it. Returns `false` if the skip was abandoned part way.
    pub fn skip_value_while(&mut self, keep_going: impl FnMut() -> bool) -> ExtractResult<bool> {
        let first = self.next_token()?;
        self.skip_from_while(first, keep_going)
    }

    fn skip_from_while(&mut self, first: Token, mut keep_going: impl FnMut() -> bool) -> ExtractResult<bool> {
        match first {
            Token::StartObject | Token::StartArray => {
                let mut depth = 1usize;
                while depth > 0 {
                    if !keep_going() {
                        return Ok(false);
                    }
                    match self.next_token()? {
                        Token::StartObject | Token::StartArray => depth += 1,
                        Token::EndObject | Token::EndArray => depth -= 1,
                        Token::Eof => return Err(unexpected(&Token::Eof, "a closing bracket")),
                        _ => {}
                    }
                }
                Ok(true)
            }
            Token::String(_) | Token::Number(_) | Token::Bool(_) | Token::Null => Ok(true),
            other => Err(unexpected(&other, "a value")),
        }
    }

    pub fn read_value(&mut self) -> ExtractResult<Value> {
        let first = self.next_token()?;
        self.value_from(first)
    }

    /// Builds the value that begins with `first`. Values nested deeper than
    /// [`MAX_VALUE_DEPTH`] are an error.
    pub fn value_from(&mut self, first: Token) -> ExtractResult<Value> {
        self.value_at(first, 1)
    }

    fn value_at(&mut self, first: Token, depth: usize) -> ExtractResult<Value> {
        match first {
            Token::StartObject | Token::StartArray if depth > MAX_VALUE_DEPTH => Err(ExtractError::Json(
                format!("value nested deeper than {MAX_VALUE_DEPTH} levels"),
            )),
            Token::StartObject => {
                let mut map = Map::new();
                loop {
                    match self.next_token()? {
                        Token::Key(key) => {
                            let first = self.next_token()?;
                            let value = self.value_at(first, depth + 1)?;
                            map.insert(key, value);
                        }
                        Token::EndObject => return Ok(Value::Object(map)),
                        other => return Err(unexpected(&other, "an object key")),
                    }
                }
            }
            Token::StartArray => {
                let mut items = Vec::new();
                loop {
                    match self.next_token()? {
                        Token::EndArray => return Ok(Value::Array(items)),
                        token => items.push(self.value_at(token, depth + 1)?),
                    }
                }
            }
            Token::String(s) => Ok(Value::String(s)),
            Token::Number(n) => parse_number(&n),
            Token::Bool(b) => Ok(Value::Bool(b)),
            Token::Null => Ok(Value::Null),
            other => Err(unexpected(&other, "a value")),
        }
    }
}

fn parse_number(raw: &str) -> ExtractResult<Value> {
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_number)
        .ok_or_else(|| ExtractError::Json(format!("invalid number literal {raw:?}")))
}

fn describe(token: &Token) -> String {
    match token {
        Token::StartObject => "'{'".to_string(),
        Token::EndObject => "'}'".to_string(),
        Token::StartArray => "'['".to_string(),
        Token::EndArray => "']'".to_string(),
        Token::Key(key) => format!("key {key:?}"),
        Token::String(_) => "a string".to_string(),
        Token::Number(n) => format!("number {n}"),
        Token::Bool(b) => format!("{b}"),
        Token::Null => "null".to_string(),
        Token::Eof => "end of input".to_string(),
    }
}

fn unexpected(token: &Token, wanted: &str) -> ExtractError {
    ExtractError::Json(format!("expected {wanted}, found {}", describe(token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(text: &str) -> TokenStream<&[u8]> {
        TokenStream::new(text.as_bytes())
    }

    #[test]
    fn walks_top_level_keys_and_skips_values() {
        let mut tokens = stream(r#"{"a": {"x": [1, 2, {"y": null}]}, "b": "keep", "c": [[], {}]}"#);
        tokens.begin_root().unwrap();

        assert_eq!(tokens.next_key().unwrap().as_deref(), Some("a"));
        tokens.skip_value().unwrap();
        assert_eq!(tokens.next_key().unwrap().as_deref(), Some("b"));
        assert_eq!(tokens.read_value().unwrap(), json!("keep"));
        assert_eq!(tokens.next_key().unwrap().as_deref(), Some("c"));
        tokens.skip_value().unwrap();
        assert_eq!(tokens.next_key().unwrap(), None);
        tokens.end_document().unwrap();
    }

    #[test]
    fn builds_array_items_one_at_a_time() {
        let mut tokens = stream(r#"{"items": [{"n": 1.5, "ok": true}, 7, "s"]}"#);
        tokens.begin_root().unwrap();
        tokens.next_key().unwrap();
        assert!(tokens.begin_array("items").unwrap());

        let mut seen = Vec::new();
        while let Some(first) = tokens.next_item().unwrap() {
            seen.push(tokens.value_from(first).unwrap());
        }
        assert_eq!(seen, vec![json!({"n": 1.5, "ok": true}), json!(7), json!("s")]);
    }

    #[test]
    fn null_section_reads_as_empty() {
        let mut tokens = stream(r#"{"in_network": null}"#);
        tokens.begin_root().unwrap();
        tokens.next_key().unwrap();
        assert!(!tokens.begin_array("in_network").unwrap());
    }

    #[test]
    fn non_object_root_is_unrecognized() {
        let err = stream("[1, 2]").begin_root().unwrap_err();
        assert!(matches!(err, ExtractError::UnrecognizedSchema(_)));
    }

    #[test]
    fn truncated_document_is_an_error() {
        let mut tokens = stream(r#"{"in_network": [{"billing_code": "99213""#);
        tokens.begin_root().unwrap();
        tokens.next_key().unwrap();
        tokens.begin_array("in_network").unwrap();
        let first = tokens.next_item().unwrap().unwrap();
        assert!(tokens.value_from(first).is_err());
    }

    #[test]
    fn nesting_past_the_depth_bound_is_an_error() {
        let at_bound = format!("{}{}", "[".repeat(MAX_VALUE_DEPTH), "]".repeat(MAX_VALUE_DEPTH));
        let mut tokens = stream(&at_bound);
        let first = tokens.next_token().unwrap();
        assert!(tokens.value_from(first).is_ok());

        let deep = format!(r#"{{"in_network": [{}{}]}}"#, "[".repeat(200_000), "]".repeat(200_000));
        let mut tokens = stream(&deep);
        tokens.begin_root().unwrap();
        tokens.next_key().unwrap();
        tokens.begin_array("in_network").unwrap();
        let first = tokens.next_item().unwrap().unwrap();
        let err = tokens.value_from(first).unwrap_err();
        assert!(matches!(err, ExtractError::Json(_)));
    }
}
