//! FXQL statement scanner.
//!
//! Turns raw text into candidate statements. Values are kept as the slices
//! written by the caller; typing and range checks happen in the validator.
//!
//! ```text
//! statement := pair ws? '{' ws? 'BUY' ws price ws 'SELL' ws price ws 'CAP' ws integer ws? '}'
//! pair      := CODE '-' CODE
//! CODE      := [A-Z]{3}
//! ```

use fxql_common::{FxqlError, Result, StatementLocation};

/// One statement as written, borrowed from the request text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement<'a> {
    /// Source currency code.
    pub source: &'a str,
    /// Destination currency code.
    pub destination: &'a str,
    /// Buy price digits.
    pub buy: &'a str,
    /// Sell price digits.
    pub sell: &'a str,
    /// Cap amount digits.
    pub cap: &'a str,
    /// 1-based position in scan order.
    pub index: usize,
    /// Line of the first character.
    pub line: usize,
    /// Character of the first character within its line.
    pub column: usize,
    /// Full statement text.
    pub fragment: &'a str,
}

impl Statement<'_> {
    /// Location used when reporting this statement.
    pub fn location(&self) -> StatementLocation {
        StatementLocation::new(self.index, self.line, self.column, self.fragment)
    }
}

/// Parse every statement in `text`.
///
/// Stops at the first malformed statement. Empty or whitespace-only input is
/// rejected with [`FxqlError::EmptyStatement`].
pub fn parse(text: &str) -> Result<Vec<Statement<'_>>> {
    let mut parser = Parser::new(text);
    let mut statements = Vec::new();

    loop {
        parser.skip_whitespace();
        if parser.at_end() {
            break;
        }
        let statement = parser.statement(statements.len() + 1)?;
        statements.push(statement);
    }

    if statements.is_empty() {
        return Err(FxqlError::EmptyStatement);
    }
    Ok(statements)
}

/// Where the statement under construction began.
#[derive(Debug, Clone, Copy)]
struct Start {
    index: usize,
    pos: usize,
    line: usize,
    column: usize,
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    line_start: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Every byte consumed on the current line is ASCII, so the byte offset
    /// from the line start is also the character offset.
    fn column(&self) -> usize {
        self.pos - self.line_start + 1
    }

    /// Advance over ASCII whitespace, returning whether any was consumed.
    fn skip_whitespace(&mut self) -> bool {
        let before = self.pos;
        while let Some(b) = self.peek() {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.line_start = self.pos;
            }
        }
        self.pos > before
    }

    fn statement(&mut self, index: usize) -> Result<Statement<'a>> {
        let start = Start {
            index,
            pos: self.pos,
            line: self.line,
            column: self.column(),
        };

        let source = self.code(start)?;
        self.byte(b'-', "'-' between currency codes", start)?;
        let destination = self.code(start)?;
        self.skip_whitespace();
        self.byte(b'{', "'{'", start)?;
        self.skip_whitespace();

        self.keyword("BUY", start)?;
        self.whitespace("whitespace after BUY", start)?;
        let buy = self.price("buy price", start)?;
        self.whitespace("whitespace after buy price", start)?;

        self.keyword("SELL", start)?;
        self.whitespace("whitespace after SELL", start)?;
        let sell = self.price("sell price", start)?;
        self.whitespace("whitespace after sell price", start)?;

        self.keyword("CAP", start)?;
        self.whitespace("whitespace after CAP", start)?;
        let cap = self.digits("integer cap amount", start)?;
        self.skip_whitespace();
        self.byte(b'}', "'}'", start)?;

        Ok(Statement {
            source,
            destination,
            buy,
            sell,
            cap,
            index: start.index,
            line: start.line,
            column: start.column,
            fragment: &self.text[start.pos..self.pos],
        })
    }

    fn code(&mut self, start: Start) -> Result<&'a str> {
        let end = self.pos + 3;
        let ok = self
            .bytes
            .get(self.pos..end)
            .is_some_and(|b| b.iter().all(u8::is_ascii_uppercase));
        if !ok {
            return Err(self.malformed(start, "three-letter uppercase currency code"));
        }
        let code = &self.text[self.pos..end];
        self.pos = end;
        Ok(code)
    }

    fn byte(&mut self, expected: u8, what: &str, start: Start) -> Result<()> {
        if self.peek() != Some(expected) {
            return Err(self.malformed(start, what));
        }
        self.pos += 1;
        Ok(())
    }

    fn keyword(&mut self, keyword: &str, start: Start) -> Result<()> {
        if !self.bytes[self.pos..].starts_with(keyword.as_bytes()) {
            return Err(self.malformed(start, &format!("'{}'", keyword)));
        }
        self.pos += keyword.len();
        Ok(())
    }

    fn whitespace(&mut self, what: &str, start: Start) -> Result<()> {
        if self.skip_whitespace() {
            Ok(())
        } else {
            Err(self.malformed(start, what))
        }
    }

    fn digits(&mut self, what: &str, start: Start) -> Result<&'a str> {
        let begin = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == begin {
            return Err(self.malformed(start, what));
        }
        Ok(&self.text[begin..self.pos])
    }

    fn price(&mut self, what: &str, start: Start) -> Result<&'a str> {
        let begin = self.pos;
        self.digits(what, start)?;
        if self.peek() == Some(b'.') {
            self.pos += 1;
            self.digits(what, start)?;
        }
        Ok(&self.text[begin..self.pos])
    }

    /// Error for the statement at `start`, citing text up to the next `}`.
    fn malformed(&self, start: Start, expected: &str) -> FxqlError {
        let rest = &self.text[start.pos..];
        let fragment = match rest.find('}') {
            Some(close) => &rest[..=close],
            None => rest.trim_end(),
        };
        FxqlError::MalformedStatement {
            location: StatementLocation::new(start.index, start.line, start.column, fragment),
            expected: expected.to_string(),
        }
    }
}
