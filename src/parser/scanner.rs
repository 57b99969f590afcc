//! Character cursor for structural WDL extraction
//!
//! The scanner walks the source left to right with one byte offset, the same
//! way a token stream is consumed with `peek`/`next`/`expect`. Bracketed
//! regions are measured by balanced scanning that steps over string
//! literals, comments and `<<< >>>` heredocs, so the caller never needs a
//! full expression grammar.

use crate::error::{ConvertError, Result, SourcePosition};
use crate::types::identifier;

/// How a bracketed region treats its contents while looking for the close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// WDL code: strings, `#` comments and heredocs are skipped
    Code,
    /// Shell text inside `command { }`: only braces count
    Raw,
}

/// A cursor over `source[start..end]`; positions are reported against the
/// whole source so nested scanners produce correct line numbers.
#[derive(Debug, Clone)]
pub(crate) struct Scanner<'a> {
    source: &'a str,
    uri: &'a str,
    pos: usize,
    end: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str, uri: &'a str) -> Self {
        Self {
            source,
            uri,
            pos: 0,
            end: source.len(),
        }
    }

    /// A scanner limited to `start..end` of the same source.
    pub fn sub(&self, start: usize, end: usize) -> Self {
        Self {
            source: self.source,
            uri: self.uri,
            pos: start,
            end,
        }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn set_offset(&mut self, pos: usize) {
        self.pos = pos.min(self.end);
    }

    pub fn rest(&self) -> &'a str {
        &self.source[self.pos..self.end]
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.source[start..end]
    }

    pub fn is_eof(&mut self) -> bool {
        self.skip_trivia();
        self.pos >= self.end
    }

    pub fn position_at(&self, offset: usize) -> SourcePosition {
        SourcePosition::from_offset(self.uri, self.source, offset)
    }

    pub fn current_position(&self) -> SourcePosition {
        self.position_at(self.pos)
    }

    /// Build a syntax error at the current offset.
    pub fn error(&self, message: impl Into<String>) -> ConvertError {
        ConvertError::syntax_error(self.current_position(), message)
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Skip whitespace and `#` comments.
    pub fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with('#') {
                let line_len = trimmed.find('\n').unwrap_or(trimmed.len());
                self.pos += line_len;
            } else {
                break;
            }
        }
    }

    /// Skip spaces and tabs only, stopping at a newline.
    pub fn skip_inline_space(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches(&[' ', '\t', '\r'][..]);
        self.pos += rest.len() - trimmed.len();
    }

    /// The next character after trivia, without consuming it.
    pub fn peek(&mut self) -> Option<char> {
        self.skip_trivia();
        self.peek_char()
    }

    /// Consume `expected` after trivia if it is next.
    pub fn try_consume(&mut self, expected: &str) -> bool {
        self.skip_trivia();
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    /// Consume `expected` after trivia or fail.
    pub fn expect(&mut self, expected: &str) -> Result<()> {
        if self.try_consume(expected) {
            Ok(())
        } else {
            let found = self.peek_char().map(|c| format!("'{}'", c));
            Err(self.error(format!(
                "Expected '{}', found {}",
                expected,
                found.as_deref().unwrap_or("end of input")
            )))
        }
    }

    /// The identifier at the cursor, without consuming it.
    pub fn peek_identifier(&mut self) -> Option<&'a str> {
        self.skip_trivia();
        let rest = self.rest();
        identifier(rest).ok().map(|(_, id)| id)
    }

    /// Consume `keyword` when it is the next whole word.
    pub fn try_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_identifier() == Some(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    /// Consume an identifier, allowing `.`-separated namespaces when `dotted`.
    pub fn identifier(&mut self, what: &str, dotted: bool) -> Result<&'a str> {
        let start = self.pos_after_trivia();
        let Some(first) = self.peek_identifier() else {
            return Err(self.error(format!("Expected {}", what)));
        };
        self.pos += first.len();
        if dotted {
            while self.rest().starts_with('.') {
                match identifier(&self.rest()[1..]) {
                    Ok((_, part)) => self.pos += 1 + part.len(),
                    Err(_) => break,
                }
            }
        }
        Ok(self.slice(start, self.pos))
    }

    fn pos_after_trivia(&mut self) -> usize {
        self.skip_trivia();
        self.pos
    }

    /// Consume a WDL type such as `Array[Map[String,File]]+?` and return its text.
    pub fn type_text(&mut self) -> Result<&'a str> {
        let start = self.pos_after_trivia();
        self.identifier("a type", true)?;
        self.skip_inline_space();
        if self.rest().starts_with('[') {
            self.pos += 1;
            let (_, close) = self.balanced(Mode::Code, '[', ']')?;
            self.pos = close + 1;
        }
        for marker in ['+', '?'] {
            if self.rest().starts_with(marker) {
                self.pos += 1;
            }
        }
        Ok(self.slice(start, self.pos))
    }

    /// Expect `open` and return the inner range of the bracketed region,
    /// leaving the cursor after the closing bracket.
    pub fn block(&mut self, open: char, close: char, mode: Mode) -> Result<(usize, usize)> {
        self.skip_trivia();
        if self.peek_char() != Some(open) {
            return Err(self.error(format!("Expected '{}'", open)));
        }
        self.pos += open.len_utf8();
        let (start, end) = self.balanced(mode, open, close)?;
        self.pos = end + close.len_utf8();
        Ok((start, end))
    }

    /// Expect `<<<` and return the range up to the matching `>>>`.
    pub fn heredoc(&mut self) -> Result<(usize, usize)> {
        self.expect("<<<")?;
        let start = self.pos;
        match self.rest().find(">>>") {
            Some(len) => {
                self.pos = start + len + 3;
                Ok((start, start + len))
            }
            None => Err(ConvertError::syntax_error(
                self.position_at(start),
                "Unterminated '<<<' block",
            )),
        }
    }

    /// Scan from the cursor (just inside `open`) to the matching `close`;
    /// returns `(inner_start, close_offset)` without moving the cursor.
    fn balanced(&self, mode: Mode, open: char, close: char) -> Result<(usize, usize)> {
        let start = self.pos;
        let text = self.rest();
        let bytes = text.as_bytes();
        let mut depth = 1usize;
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            match mode {
                Mode::Code if c == '"' || c == '\'' => {
                    i = skip_string(text, i);
                    continue;
                }
                Mode::Code if c == '#' => {
                    i += text[i..].find('\n').unwrap_or(text.len() - i);
                    continue;
                }
                Mode::Code if bytes[i..].starts_with(b"<<<") => {
                    match text[i + 3..].find(">>>") {
                        Some(len) => i += 3 + len + 3,
                        None => i = text.len(),
                    }
                    continue;
                }
                Mode::Code if c == 'c' => {
                    if let Some(end) = raw_command_end(text, i) {
                        i = end;
                        continue;
                    }
                }
                _ => {}
            }
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok((start, start + i));
                }
            }
            i += 1;
        }
        Err(ConvertError::syntax_error(
            self.position_at(start.saturating_sub(open.len_utf8())),
            format!("Unbalanced '{}': no matching '{}'", open, close),
        ))
    }

    /// Read an expression up to a line end, `,` or an unopened closing
    /// bracket, continuing across lines while brackets are open.
    pub fn expression(&mut self) -> Result<&'a str> {
        self.skip_inline_space();
        let start = self.pos;
        let text = self.rest();
        let mut depth = 0usize;
        let mut i = 0;
        while i < text.len() {
            let c = text.as_bytes()[i] as char;
            match c {
                '"' | '\'' => {
                    i = skip_string(text, i);
                    continue;
                }
                '#' if depth == 0 => break,
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                '\n' | ',' if depth == 0 => break,
                _ => {}
            }
            i += 1;
        }
        self.pos = start + i;
        let expr = text[..i].trim();
        if expr.is_empty() {
            Err(ConvertError::syntax_error(
                self.position_at(start),
                "Expected an expression",
            ))
        } else {
            Ok(expr)
        }
    }

    /// Consume a quoted string literal and return its raw contents.
    pub fn string_literal(&mut self) -> Result<&'a str> {
        self.skip_trivia();
        let text = self.rest();
        let bytes = text.as_bytes();
        let Some(&quote) = bytes.first().filter(|b| **b == b'"' || **b == b'\'') else {
            return Err(self.error("Expected a string literal"));
        };
        let end = skip_string(text, 0);
        if end < 2 || bytes[end - 1] != quote {
            return Err(self.error("Unterminated string literal"));
        }
        self.pos += end;
        Ok(&text[1..end - 1])
    }

    /// Skip the rest of the current line.
    pub fn skip_line(&mut self) {
        let rest = self.rest();
        self.pos += rest.find('\n').map(|n| n + 1).unwrap_or(rest.len());
    }
}

/// When `command {` starts at `at`, the offset just past its closing brace.
/// Shell text is matched by braces alone.
fn raw_command_end(text: &str, at: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let word_start = at == 0 || !(bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
    if !word_start || !bytes[at..].starts_with(b"command") {
        return None;
    }
    let after = at + "command".len();
    let gap = text[after..].len() - text[after..].trim_start().len();
    let open = after + gap;
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (offset, b) in bytes[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset just past the string literal starting at `start`. Placeholders
/// `~{...}` / `${...}` may contain quotes of their own.
fn skip_string(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    let mut placeholder = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if placeholder > 0 {
            match b {
                b'{' => placeholder += 1,
                b'}' => placeholder -= 1,
                _ => {}
            }
        } else if b == b'\\' {
            i += 1;
        } else if (b == b'~' || b == b'$') && bytes.get(i + 1) == Some(&b'{') {
            placeholder = 1;
            i += 1;
        } else if b == quote {
            return i + 1;
        } else if b == b'\n' {
            // unterminated on this line; resume scanning after it
            return i;
        }
        i += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_and_identifiers() {
        let mut scanner = Scanner::new("  # comment\n task hello_world {", "");
        assert!(!scanner.try_keyword("tasks"));
        assert!(scanner.try_keyword("task"));
        assert_eq!(scanner.identifier("task name", false).unwrap(), "hello_world");
        assert_eq!(scanner.peek(), Some('{'));
    }

    #[test]
    fn test_dotted_identifier() {
        let mut scanner = Scanner::new("lib.align as a", "");
        assert_eq!(scanner.identifier("task", true).unwrap(), "lib.align");
        assert!(scanner.try_keyword("as"));
    }

    #[test]
    fn test_block_skips_strings_and_heredocs() {
        let source = r#"{ String s = "}" command <<< echo } >>> # }
 x } tail"#;
        let mut scanner = Scanner::new(source, "");
        let (start, end) = scanner.block('{', '}', Mode::Code).unwrap();
        assert!(scanner.slice(start, end).trim_end().ends_with('x'));
        assert_eq!(scanner.rest(), " tail");
    }

    #[test]
    fn test_nested_command_block_is_raw() {
        let source = "{\n  command { echo it's ${x#*/} }\n  output { File f = \"a\" }\n} after";
        let mut scanner = Scanner::new(source, "");
        scanner.block('{', '}', Mode::Code).unwrap();
        assert_eq!(scanner.rest(), " after");
    }

    #[test]
    fn test_raw_block_counts_braces_only() {
        let source = "{ echo \"it's ${HOME}\" }after";
        let mut scanner = Scanner::new(source, "");
        let (start, end) = scanner.block('{', '}', Mode::Raw).unwrap();
        assert_eq!(scanner.slice(start, end), " echo \"it's ${HOME}\" ");
        assert_eq!(scanner.rest(), "after");
    }

    #[test]
    fn test_unbalanced_block_position() {
        let mut scanner = Scanner::new("task t\n{ command {", "x.wdl");
        scanner.try_keyword("task");
        scanner.identifier("name", false).unwrap();
        match scanner.block('{', '}', Mode::Code) {
            Err(ConvertError::Syntax { pos, .. }) => {
                assert_eq!(pos.line, 2);
                assert_eq!(pos.column, 1);
                assert_eq!(pos.uri, "x.wdl");
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_type_text() {
        let mut scanner = Scanner::new("Array[Map[String, File]]+? files", "");
        assert_eq!(scanner.type_text().unwrap(), "Array[Map[String, File]]+?");
        assert_eq!(scanner.identifier("name", false).unwrap(), "files");
    }

    #[test]
    fn test_expression_spans_open_brackets() {
        let mut scanner = Scanner::new("[\n  \"a\",\n  \"b\"\n]\nnext", "");
        assert_eq!(scanner.expression().unwrap(), "[\n  \"a\",\n  \"b\"\n]");
        let mut scanner = Scanner::new("x.y, b = 2 }", "");
        assert_eq!(scanner.expression().unwrap(), "x.y");
        assert!(scanner.try_consume(","));
        let mut scanner = Scanner::new("\"~{if a then \"x\" else \"y\"}\" # note", "");
        assert_eq!(scanner.expression().unwrap(), "\"~{if a then \"x\" else \"y\"}\"");
    }

    #[test]
    fn test_string_literal() {
        let mut scanner = Scanner::new(" \"lib/a.wdl\" as a", "");
        assert_eq!(scanner.string_literal().unwrap(), "lib/a.wdl");
        assert!(scanner.try_keyword("as"));
        assert!(Scanner::new("\"open", "").string_literal().is_err());
        assert!(Scanner::new("bare", "").string_literal().is_err());
    }

    #[test]
    fn test_heredoc() {
        let mut scanner = Scanner::new("<<< echo ${x} >>> rest", "");
        let (start, end) = scanner.heredoc().unwrap();
        assert_eq!(scanner.slice(start, end), " echo ${x} ");
        assert!(Scanner::new("<<< never closed", "").heredoc().is_err());
    }
}
