//! Decoder for `sqlite3 -header` insert-mode output.
//!
//! Every row arrives as one SQL statement that carries its own column list:
//!
//! ```text
//! INSERT INTO "table"(id,name,"full name") VALUES(1,'ann',NULL);
//! ```
//!
//! Column names are bare identifiers or `"..."` with `""` for an embedded
//! quote. Values are SQL literals:
//!
//! - `NULL`
//! - bare integers and reals (`42`, `-1.5`, `9.0e+999` for infinity)
//! - text as `'...'` with `''` for an embedded quote
//! - blobs as `X'0a1b'`
//! - text with control characters as `unistr('a\u000ab')`, or on older
//!   shells `replace('a\nb','\n',char(10))` (the placeholder varies and may
//!   be nested once more for `char(13)`)
//!
//! Literals are self-delimiting, so a raw newline inside one is part of the
//! value. A record ends at the `;` after its `VALUES(...)`.

use super::{Number, QueryResult, Value};
use crate::error::{ExecutionError, Result};

/// Parse raw insert-mode output into columns and typed rows.
///
/// Empty output is a successful statement with no rows. The first record's
/// column list defines the columns; a record with a different list belongs to
/// a second result set and is rejected.
pub fn parse(raw: &[u8]) -> Result<QueryResult> {
    let text = std::str::from_utf8(raw).map_err(|e| {
        let at = e.valid_up_to();
        ExecutionError::parse(
            format!("output is not valid UTF-8 at byte {}", at),
            &String::from_utf8_lossy(&raw[at..]),
        )
    })?;

    let mut cursor = Cursor::new(text);
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    while !cursor.rest().is_empty() {
        let start = cursor.pos;
        let at = || format!("line {}", line_of(text, start));
        let (names, values) = cursor.record().map_err(|reason| {
            ExecutionError::parse(format!("{}: {}", at(), reason), &text[start..])
        })?;

        match &columns {
            None => columns = Some(names),
            Some(expected) if *expected == names => {}
            Some(expected) => {
                return Err(ExecutionError::parse(
                    format!(
                        "{}: columns {:?} start a second result set after {:?}; \
                         run one row-returning statement per call",
                        at(),
                        names,
                        expected
                    ),
                    &text[start..],
                ));
            }
        }

        let width = columns.as_ref().map_or(0, Vec::len);
        if values.len() != width {
            return Err(ExecutionError::parse(
                format!("{} has {} fields, header has {} columns", at(), values.len(), width),
                &text[start..],
            ));
        }
        rows.push(values);
    }

    Ok(match columns {
        Some(columns) => QueryResult::new(columns, rows),
        None => QueryResult::default(),
    })
}

fn line_of(text: &str, pos: usize) -> usize {
    text[..pos].matches('\n').count() + 1
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

type Step<T> = std::result::Result<T, String>;

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, c: char) -> Step<()> {
        match self.bump() {
            Some(got) if got == c => Ok(()),
            Some(got) => Err(format!("expected {:?}, found {:?}", c, got)),
            None => Err(format!("expected {:?}, found end of output", c)),
        }
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.bump();
        }
    }

    /// Consume `keyword` (ASCII case-insensitive) if the input starts with it.
    fn keyword(&mut self, keyword: &str) -> bool {
        let rest = self.rest();
        if rest.len() >= keyword.len()
            && rest.is_char_boundary(keyword.len())
            && rest[..keyword.len()].eq_ignore_ascii_case(keyword)
        {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    /// `INSERT INTO <table>(<columns>) VALUES(<values>);` and its line break.
    fn record(&mut self) -> Step<(Vec<String>, Vec<Value>)> {
        if !self.keyword("INSERT INTO") {
            let word: String = self.rest().chars().take(16).collect();
            return Err(format!("expected INSERT INTO, found {:?}", word));
        }
        self.skip_spaces();
        self.identifier()?;
        if self.peek() != Some('(') {
            return Err("missing column list; headers are off".to_string());
        }
        self.bump();
        let columns = self.list(Self::identifier)?;

        self.skip_spaces();
        if !self.keyword("VALUES") {
            return Err("expected VALUES".to_string());
        }
        self.expect('(')?;
        let values = self.list(Self::field)?;
        self.expect(';')?;

        self.keyword("\r");
        match self.bump() {
            None | Some('\n') => Ok((columns, values)),
            Some(c) => Err(format!("unexpected {:?} after end of record", c)),
        }
    }

    /// Comma-separated items up to and including the closing `)`.
    fn list<T>(&mut self, item: fn(&mut Self) -> Step<T>) -> Step<Vec<T>> {
        let mut items = Vec::new();
        loop {
            items.push(item(self)?);
            match self.bump() {
                Some(',') => {}
                Some(')') => return Ok(items),
                Some(c) => {
                    let at = self.pos - c.len_utf8();
                    return Err(format!("unexpected {:?} at byte {}", c, at));
                }
                None => return Err("record ends inside a list".to_string()),
            }
        }
    }

    fn identifier(&mut self) -> Step<String> {
        if self.peek() == Some('"') {
            return self.delimited('"');
        }
        let word: &str = {
            let rest = self.rest();
            let end = rest
                .find(|c: char| matches!(c, ',' | '(' | ')' | ' ' | '\n'))
                .unwrap_or(rest.len());
            &rest[..end]
        };
        if word.is_empty() {
            return Err("expected a name".to_string());
        }
        self.pos += word.len();
        Ok(word.to_string())
    }

    fn at_field_end(&self) -> bool {
        matches!(self.peek(), None | Some(',') | Some(')'))
    }

    fn field(&mut self) -> Step<Value> {
        match self.peek() {
            Some('\'') => return self.delimited('\'').map(Value::Text),
            Some('X') | Some('x') if self.rest()[1..].starts_with('\'') => {
                self.bump();
                let hex = self.delimited('\'')?;
                return Ok(Value::Text(format!("X'{}'", hex)));
            }
            _ => {}
        }
        let save = self.pos;
        if self.keyword("NULL") {
            if self.at_field_end() {
                return Ok(Value::Null);
            }
            self.pos = save;
        }
        if self.rest().starts_with(|c: char| c.is_ascii_alphabetic()) {
            return self.text_expr().map(Value::Text);
        }
        self.number()
    }

    /// Text between `quote` characters, with the quote doubled inside.
    fn delimited(&mut self, quote: char) -> Step<String> {
        self.expect(quote)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        out.push(quote);
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
                None => return Err(format!("unterminated {}...{} literal", quote, quote)),
            }
        }
    }

    /// A text-valued expression: a literal, `replace(...)` or `unistr(...)`.
    fn text_expr(&mut self) -> Step<String> {
        if self.peek() == Some('\'') {
            return self.delimited('\'');
        }
        if self.keyword("replace(") {
            let inner = self.text_expr()?;
            self.expect(',')?;
            let placeholder = self.delimited('\'')?;
            self.expect(',')?;
            if !self.keyword("char(") {
                return Err("expected char(...) in replace()".to_string());
            }
            let code = self.integer_literal()?;
            let ch = char::from_u32(code).ok_or_else(|| format!("invalid char({})", code))?;
            self.expect(')')?;
            self.expect(')')?;
            if placeholder.is_empty() {
                return Err("empty placeholder in replace()".to_string());
            }
            return Ok(inner.replace(&placeholder, ch.encode_utf8(&mut [0; 4])));
        }
        if self.keyword("unistr(") {
            let inner = self.delimited('\'')?;
            self.expect(')')?;
            return unescape_unistr(&inner);
        }
        let word: String = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        Err(format!("unrecognized value {:?}", word))
    }

    fn integer_literal(&mut self) -> Step<u32> {
        let digits: String = self.rest().chars().take_while(|c| c.is_ascii_digit()).collect();
        self.pos += digits.len();
        digits
            .parse()
            .map_err(|_| format!("expected a number, found {:?}", digits))
    }

    fn number(&mut self) -> Step<Value> {
        let token: &str = {
            let rest = self.rest();
            let end = rest.find([',', ')']).unwrap_or(rest.len());
            &rest[..end]
        };
        let value = coerce_number(token).ok_or_else(|| format!("unrecognized value {:?}", token))?;
        self.pos += token.len();
        Ok(value)
    }
}

/// Classify a bare numeric token. Integers outside `i64` fall back to a
/// (lossy) real.
fn coerce_number(token: &str) -> Option<Value> {
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        || !token.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }
    if let Ok(n) = token.parse::<i64>() {
        return Some(Value::Number(Number::Integer(n)));
    }
    token
        .parse::<f64>()
        .ok()
        .map(|f| Value::Number(Number::Real(f)))
}

/// Decode the escapes accepted by SQLite's `unistr()`.
fn unescape_unistr(s: &str) -> Step<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let width = match chars.peek() {
            Some('\\') => {
                chars.next();
                out.push('\\');
                continue;
            }
            Some('u') => {
                chars.next();
                4
            }
            Some('+') => {
                chars.next();
                6
            }
            Some('U') => {
                chars.next();
                8
            }
            Some(_) => 4,
            None => return Err("dangling escape in unistr()".to_string()),
        };
        let hex: String = chars.by_ref().take(width).collect();
        let code = u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|_| hex.len() == width)
            .ok_or_else(|| format!("bad escape \\{} in unistr()", hex))?;
        out.push(char::from_u32(code).ok_or_else(|| format!("invalid code point {:#x}", code))?);
    }
    Ok(out)
}
