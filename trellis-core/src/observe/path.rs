//! Key-path expressions.
//!
//! A string computation handed to a watcher is a key path evaluated against
//! the watcher's scope: `a`, `a.b.c`, `items[0].name`, `map["some key"]`,
//! `items.length`. Reads go through [`Object::get`](super::Object::get), so
//! evaluating a path inside a watcher subscribes it to every field on the
//! way down.

use std::fmt;
use std::str::FromStr;

use super::{observer, Value};
use crate::error::EvalError;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Field name (`.name` or `["name"]`).
    Key(String),
    /// List index (`[3]`).
    Index(usize),
}

impl Segment {
    fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) => k.parse().ok(),
        }
    }

    fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A parsed key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    source: String,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse a key path.
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let segments = Parser::new(source).parse()?;
        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    /// The text the path was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Evaluate the path against `scope`.
    ///
    /// Reading through `undefined` or `null` is an error; reading a missing
    /// field, or a field of a primitive, yields `Undefined`.
    pub fn get(&self, scope: &Value) -> Result<Value, EvalError> {
        walk(scope.clone(), &self.segments)
    }

    /// Assign `value` at the end of the path.
    ///
    /// Existing object fields are assigned normally and new ones are added
    /// through [`observer::set`] so they become reactive. List elements are
    /// replaced through [`List::set`](super::List::set).
    pub fn set(&self, scope: &Value, value: Value) -> Result<(), EvalError> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Err(self.invalid("empty path"));
        };
        let parent = walk(scope.clone(), parents)?;

        match &parent {
            Value::Object(object) => {
                let key = last.as_key();
                if object.has(&key) {
                    object.set(&key, value);
                } else {
                    observer::set(object, &key, value);
                }
                Ok(())
            }
            Value::List(list) => match last.as_index() {
                Some(index) => {
                    list.set(index, value);
                    Ok(())
                }
                None => Err(EvalError::custom(format!(
                    "cannot assign `{last}` on a list in `{}`",
                    self.source
                ))),
            },
            Value::Undefined | Value::Null => Err(EvalError::UndefinedBase {
                key: last.to_string(),
                base: parent.type_name(),
            }),
            other => Err(EvalError::custom(format!(
                "cannot assign `{last}` on a {} in `{}`",
                other.type_name(),
                self.source
            ))),
        }
    }

    fn invalid(&self, reason: &str) -> EvalError {
        EvalError::InvalidPath {
            expression: self.source.clone(),
            reason: reason.to_owned(),
        }
    }
}

impl FromStr for Path {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn walk(mut current: Value, segments: &[Segment]) -> Result<Value, EvalError> {
    for segment in segments {
        current = step(&current, segment)?;
    }
    Ok(current)
}

fn step(current: &Value, segment: &Segment) -> Result<Value, EvalError> {
    let next = match current {
        Value::Undefined | Value::Null => {
            return Err(EvalError::UndefinedBase {
                key: segment.to_string(),
                base: current.type_name(),
            })
        }
        Value::Object(object) => object.get(&segment.as_key()),
        Value::List(list) => match segment {
            Segment::Key(k) if k == "length" => Value::from(list.len()),
            _ => segment
                .as_index()
                .and_then(|i| list.get(i))
                .unwrap_or_default(),
        },
        Value::String(s) => match segment {
            Segment::Key(k) if k == "length" => Value::from(s.chars().count()),
            _ => segment
                .as_index()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .unwrap_or_default(),
        },
        Value::Bool(_) | Value::Number(_) => Value::Undefined,
    };
    Ok(next)
}

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> EvalError {
        EvalError::InvalidPath {
            expression: self.source.to_owned(),
            reason: reason.into(),
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, EvalError> {
        let mut segments = Vec::new();
        self.skip_whitespace();
        segments.push(Segment::Key(self.identifier()?));

        loop {
            self.skip_whitespace();
            match self.chars.next() {
                None => break,
                Some((_, '.')) => {
                    self.skip_whitespace();
                    segments.push(Segment::Key(self.identifier()?));
                }
                Some((_, '[')) => {
                    self.skip_whitespace();
                    segments.push(self.bracket()?);
                    self.skip_whitespace();
                    match self.chars.next() {
                        Some((_, ']')) => {}
                        _ => return Err(self.error("expected `]`")),
                    }
                }
                Some((at, c)) => return Err(self.error(format!("unexpected `{c}` at {at}"))),
            }
        }

        Ok(segments)
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn identifier(&mut self) -> Result<String, EvalError> {
        let mut ident = String::new();
        match self.chars.next_if(|(_, c)| is_ident_start(*c)) {
            Some((_, c)) => ident.push(c),
            None => return Err(self.error("expected an identifier")),
        }
        while let Some((_, c)) = self.chars.next_if(|(_, c)| is_ident_continue(*c)) {
            ident.push(c);
        }
        Ok(ident)
    }

    fn bracket(&mut self) -> Result<Segment, EvalError> {
        match self.chars.peek().map(|(_, c)| *c) {
            Some(quote @ ('"' | '\'')) => {
                self.chars.next();
                let mut key = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, c)) if c == quote => return Ok(Segment::Key(key)),
                        Some((_, '\\')) => match self.chars.next() {
                            Some((_, c)) => key.push(c),
                            None => return Err(self.error("unterminated string")),
                        },
                        Some((_, c)) => key.push(c),
                        None => return Err(self.error("unterminated string")),
                    }
                }
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit()) {
                    digits.push(c);
                }
                digits
                    .parse()
                    .map(Segment::Index)
                    .map_err(|_| self.error("index out of range"))
            }
            _ => Err(self.error("expected an index or a quoted key")),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{List, Object};

    fn scope() -> Value {
        let item: Object = [("name", "first")].into_iter().collect();
        let items: List = [Value::from(item)].into_iter().collect();
        let map: Object = [("some key", 1)].into_iter().collect();
        let root: Object = [
            ("items", Value::from(items)),
            ("map", Value::from(map)),
            ("title", Value::from("hey")),
        ]
        .into_iter()
        .collect();
        Value::from(root)
    }

    #[test]
    fn parses_segments() {
        let path = Path::parse("items[0].name").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".into()),
                Segment::Index(0),
                Segment::Key("name".into()),
            ]
        );

        let path: Path = "map['some key']".parse().unwrap();
        assert_eq!(path.segments()[1], Segment::Key("some key".into()));
        assert_eq!(path.to_string(), "map['some key']");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "a.", "a..b", "a[", "a[x]", "a['b", "1a", "a b", "a + b"] {
            assert!(
                matches!(Path::parse(bad), Err(EvalError::InvalidPath { .. })),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn reads_nested_values() {
        let scope = scope();
        let get = |p: &str| Path::parse(p).unwrap().get(&scope).unwrap();

        assert_eq!(get("items[0].name"), Value::from("first"));
        assert_eq!(get("items.length"), Value::from(1));
        assert_eq!(get("map[\"some key\"]"), Value::from(1));
        assert_eq!(get("title.length"), Value::from(3));
        assert_eq!(get("items[5]"), Value::Undefined);
        assert_eq!(get("missing"), Value::Undefined);
    }

    #[test]
    fn reading_through_undefined_fails() {
        let err = Path::parse("missing.deeper").unwrap().get(&scope()).unwrap_err();
        assert_eq!(
            err,
            EvalError::UndefinedBase {
                key: "deeper".into(),
                base: "undefined",
            }
        );
    }

    #[test]
    fn assigns_through_the_path() {
        let scope = scope();

        Path::parse("items[0].name").unwrap().set(&scope, Value::from("renamed")).unwrap();
        Path::parse("map.added").unwrap().set(&scope, Value::from(2)).unwrap();
        Path::parse("items[1]").unwrap().set(&scope, Value::from(3)).unwrap();

        let get = |p: &str| Path::parse(p).unwrap().get(&scope).unwrap();
        assert_eq!(get("items[0].name"), Value::from("renamed"));
        assert_eq!(get("map.added"), Value::from(2));
        assert_eq!(get("items[1]"), Value::from(3));

        assert!(Path::parse("title.x").unwrap().set(&scope, Value::Null).is_err());
        assert!(Path::parse("nope.x").unwrap().set(&scope, Value::Null).is_err());
    }
}
