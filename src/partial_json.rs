//! Best-effort parser for a truncated JSON document.
//!
//! A streaming tool-call buffer is, at every step, a *prefix* of eventual
//! valid JSON. This module turns such a prefix into the `serde_json::Value`
//! it already unambiguously describes, governed by an [`Allow`] bitmask
//! that says which incomplete structural forms (string, number, array,
//! object, bool, null, the outermost value) may be closed speculatively.
//!
//! There is no published crate in the surrounding stack for this; the
//! shape below (a bitmask plus a small recursive-descent scanner) mirrors
//! the `PartialJson` / streaming-tool-parser code found elsewhere in the
//! wider Rust tool-parsing ecosystem, adapted to `serde_json::Value`.

use serde_json::{Map, Value};
use std::fmt;

/// Bitmask of JSON structural forms the parser may return in incomplete
/// (but syntactically sound) form rather than rejecting outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allow(u8);

impl Allow {
    pub const STR: Allow = Allow(1 << 0);
    pub const NUM: Allow = Allow(1 << 1);
    pub const ARR: Allow = Allow(1 << 2);
    pub const OBJ: Allow = Allow(1 << 3);
    pub const BOOL: Allow = Allow(1 << 4);
    pub const NULL: Allow = Allow(1 << 5);
    pub const OUTER: Allow = Allow(1 << 6);
    pub const NONE: Allow = Allow(0);
    pub const ALL: Allow = Allow(0b111_1111);

    pub const fn contains(self, flag: Allow) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for Allow {
    type Output = Allow;
    fn bitor(self, rhs: Allow) -> Allow {
        Allow(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Allow {
    type Output = Allow;
    fn bitand(self, rhs: Allow) -> Allow {
        Allow(self.0 & rhs.0)
    }
}

impl std::ops::Not for Allow {
    type Output = Allow;
    fn not(self) -> Allow {
        Allow(!self.0 & Allow::ALL.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartialJsonError {
    /// Input was empty once whitespace was skipped.
    Empty,
    /// A character was encountered that can't start or continue any JSON
    /// value (e.g. a bare `x`, or a stray `,` at the top level).
    UnexpectedChar(char, usize),
    /// The top-level value was incomplete and `Allow::OUTER` was not set,
    /// or the incomplete form's own flag was not set.
    Incomplete,
}

impl fmt::Display for PartialJsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialJsonError::Empty => write!(f, "empty partial JSON input"),
            PartialJsonError::UnexpectedChar(c, pos) => {
                write!(f, "unexpected character '{c}' at position {pos}")
            }
            PartialJsonError::Incomplete => {
                write!(f, "value incomplete and not permitted by allow mask")
            }
        }
    }
}

impl std::error::Error for PartialJsonError {}

/// The outcome of attempting to parse one JSON value from the buffer.
enum Outcome {
    /// Value was fully present, delimited properly.
    Complete(Value),
    /// Value was visibly incomplete but the bitmask allows surfacing it.
    Partial(Value),
    /// Value was incomplete and the bitmask forbids surfacing it at all.
    NotAllowed,
}

/// Parses `text` as far as it unambiguously goes, honoring `allow`.
///
/// Returns the best-effort [`Value`] for the prefix, or
/// [`PartialJsonError::Incomplete`] if nothing usable could be produced
/// (e.g. the entire buffer is an incomplete string and `Allow::STR` is
/// unset).
pub fn parse(text: &str, allow: Allow) -> Result<Value, PartialJsonError> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0usize;
    skip_ws(&chars, &mut pos);
    if pos >= chars.len() {
        return Err(PartialJsonError::Empty);
    }
    match parse_value(&chars, &mut pos, allow)? {
        Outcome::Complete(v) => Ok(v),
        Outcome::Partial(v) => {
            if allow.contains(Allow::OUTER) {
                Ok(v)
            } else {
                Err(PartialJsonError::Incomplete)
            }
        }
        Outcome::NotAllowed => Err(PartialJsonError::Incomplete),
    }
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

fn parse_value(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    skip_ws(chars, pos);
    if *pos >= chars.len() {
        return Err(PartialJsonError::Empty);
    }
    match chars[*pos] {
        '"' => parse_string(chars, pos, allow),
        '{' => parse_object(chars, pos, allow),
        '[' => parse_array(chars, pos, allow),
        't' | 'f' => parse_bool(chars, pos, allow),
        'n' => parse_null(chars, pos, allow),
        '-' | '0'..='9' => parse_number(chars, pos, allow),
        c => Err(PartialJsonError::UnexpectedChar(c, *pos)),
    }
}

fn parse_string(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    debug_assert_eq!(chars[*pos], '"');
    let start = *pos;
    *pos += 1;
    let mut out = String::new();
    while *pos < chars.len() {
        let c = chars[*pos];
        if c == '"' {
            *pos += 1;
            return Ok(Outcome::Complete(Value::String(out)));
        }
        if c == '\\' {
            *pos += 1;
            if *pos >= chars.len() {
                break;
            }
            match chars[*pos] {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                '/' => out.push('/'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'u' => {
                    if *pos + 4 < chars.len() {
                        let hex: String = chars[*pos + 1..*pos + 5].iter().collect();
                        if let Ok(code) = u32::from_str_radix(&hex, 16) {
                            if let Some(ch) = char::from_u32(code) {
                                out.push(ch);
                            }
                        }
                        *pos += 4;
                    } else {
                        // truncated \u escape: can't be decoded, stop here
                        *pos = chars.len();
                        break;
                    }
                }
                other => out.push(other),
            }
            *pos += 1;
            continue;
        }
        out.push(c);
        *pos += 1;
    }
    // ran off the end without a closing quote
    *pos = chars.len();
    let _ = start;
    if allow.contains(Allow::STR) {
        Ok(Outcome::Partial(Value::String(out)))
    } else {
        Ok(Outcome::NotAllowed)
    }
}

fn parse_number(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    let start = *pos;
    if chars[*pos] == '-' {
        *pos += 1;
    }
    let int_start = *pos;
    while *pos < chars.len() && chars[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == int_start {
        // no integer digits at all ("-" alone, or stray char) - unusable
        *pos = start;
        return Ok(Outcome::NotAllowed);
    }
    let mut saw_frac = false;
    if *pos < chars.len() && chars[*pos] == '.' {
        let dot = *pos;
        let mut p = *pos + 1;
        let digit_start = p;
        while p < chars.len() && chars[p].is_ascii_digit() {
            p += 1;
        }
        if p > digit_start {
            *pos = p;
            saw_frac = true;
        } else {
            // trailing "." with no digits yet - not a valid terminal number
            let consumed = &chars[start..dot];
            return finish_number(consumed, allow);
        }
    }
    let _ = saw_frac;
    if *pos < chars.len() && (chars[*pos] == 'e' || chars[*pos] == 'E') {
        let exp = *pos;
        let mut p = *pos + 1;
        if p < chars.len() && (chars[p] == '+' || chars[p] == '-') {
            p += 1;
        }
        let digit_start = p;
        while p < chars.len() && chars[p].is_ascii_digit() {
            p += 1;
        }
        if p > digit_start {
            *pos = p;
        } else {
            let consumed = &chars[start..exp];
            return finish_number(consumed, allow);
        }
    }
    let consumed = &chars[start..*pos];
    finish_number(consumed, allow)
}

fn finish_number(consumed: &[char], allow: Allow) -> Result<Outcome, PartialJsonError> {
    let text: String = consumed.iter().collect();
    let n: serde_json::Number = match text.parse::<f64>() {
        Ok(_) => match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => return Ok(Outcome::NotAllowed),
        },
        Err(_) => return Ok(Outcome::NotAllowed),
    };
    // A well-formed numeral at buffer end might still grow another digit
    // on the next step, so it is always "Partial" unless NUM forbids
    // surfacing numbers before their trailing delimiter is seen.
    if allow.contains(Allow::NUM) {
        Ok(Outcome::Partial(Value::Number(n)))
    } else {
        Ok(Outcome::NotAllowed)
    }
}

fn parse_literal(
    chars: &[char],
    pos: &mut usize,
    literal: &str,
    value: Value,
    flag: Allow,
    allow: Allow,
) -> Outcome {
    let remaining = chars.len() - *pos;
    let lit_chars: Vec<char> = literal.chars().collect();
    let take = remaining.min(lit_chars.len());
    if chars[*pos..*pos + take] != lit_chars[..take] {
        return Outcome::NotAllowed;
    }
    if take == lit_chars.len() {
        *pos += take;
        return Outcome::Complete(value);
    }
    // literal spelled only partially - no safe speculative value
    *pos += take;
    let _ = flag;
    let _ = allow;
    Outcome::NotAllowed
}

fn parse_bool(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    let outcome = if chars[*pos] == 't' {
        parse_literal(chars, pos, "true", Value::Bool(true), Allow::BOOL, allow)
    } else {
        parse_literal(chars, pos, "false", Value::Bool(false), Allow::BOOL, allow)
    };
    Ok(outcome)
}

fn parse_null(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    Ok(parse_literal(chars, pos, "null", Value::Null, Allow::NULL, allow))
}

fn parse_array(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    debug_assert_eq!(chars[*pos], '[');
    *pos += 1;
    let mut items = Vec::new();
    skip_ws(chars, pos);
    if *pos < chars.len() && chars[*pos] == ']' {
        *pos += 1;
        return Ok(Outcome::Complete(Value::Array(items)));
    }
    loop {
        skip_ws(chars, pos);
        if *pos >= chars.len() {
            return allow_incomplete_array(items, allow);
        }
        match parse_value(chars, pos, allow) {
            Ok(Outcome::Complete(v)) => items.push(v),
            Ok(Outcome::Partial(v)) => {
                items.push(v);
                return allow_incomplete_array(items, allow);
            }
            Ok(Outcome::NotAllowed) => return allow_incomplete_array(items, allow),
            Err(PartialJsonError::Empty) => return allow_incomplete_array(items, allow),
            Err(e) => return Err(e),
        }
        skip_ws(chars, pos);
        if *pos >= chars.len() {
            return allow_incomplete_array(items, allow);
        }
        match chars[*pos] {
            ',' => {
                *pos += 1;
                continue;
            }
            ']' => {
                *pos += 1;
                return Ok(Outcome::Complete(Value::Array(items)));
            }
            _ => return allow_incomplete_array(items, allow),
        }
    }
}

fn allow_incomplete_array(items: Vec<Value>, allow: Allow) -> Result<Outcome, PartialJsonError> {
    if allow.contains(Allow::ARR) {
        Ok(Outcome::Partial(Value::Array(items)))
    } else {
        Ok(Outcome::NotAllowed)
    }
}

fn parse_object(chars: &[char], pos: &mut usize, allow: Allow) -> Result<Outcome, PartialJsonError> {
    debug_assert_eq!(chars[*pos], '{');
    *pos += 1;
    let mut map = Map::new();
    skip_ws(chars, pos);
    if *pos < chars.len() && chars[*pos] == '}' {
        *pos += 1;
        return Ok(Outcome::Complete(Value::Object(map)));
    }
    loop {
        skip_ws(chars, pos);
        if *pos >= chars.len() || chars[*pos] != '"' {
            return allow_incomplete_object(map, allow);
        }
        let key = match parse_string(chars, pos, allow)? {
            Outcome::Complete(Value::String(k)) => k,
            _ => return allow_incomplete_object(map, allow),
        };
        skip_ws(chars, pos);
        if *pos >= chars.len() || chars[*pos] != ':' {
            return allow_incomplete_object(map, allow);
        }
        *pos += 1;
        skip_ws(chars, pos);
        if *pos >= chars.len() {
            return allow_incomplete_object(map, allow);
        }
        match parse_value(chars, pos, allow) {
            Ok(Outcome::Complete(v)) => {
                map.insert(key, v);
            }
            Ok(Outcome::Partial(v)) => {
                map.insert(key, v);
                return allow_incomplete_object(map, allow);
            }
            Ok(Outcome::NotAllowed) => return allow_incomplete_object(map, allow),
            Err(PartialJsonError::Empty) => return allow_incomplete_object(map, allow),
            Err(e) => return Err(e),
        }
        skip_ws(chars, pos);
        if *pos >= chars.len() {
            return allow_incomplete_object(map, allow);
        }
        match chars[*pos] {
            ',' => {
                *pos += 1;
                continue;
            }
            '}' => {
                *pos += 1;
                return Ok(Outcome::Complete(Value::Object(map)));
            }
            _ => return allow_incomplete_object(map, allow),
        }
    }
}

fn allow_incomplete_object(map: Map<String, Value>, allow: Allow) -> Result<Outcome, PartialJsonError> {
    if allow.contains(Allow::OBJ) {
        Ok(Outcome::Partial(Value::Object(map)))
    } else {
        Ok(Outcome::NotAllowed)
    }
}
