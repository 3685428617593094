use crate::error::{LiantError, Result};
use crate::model::{HintNode, RouteDirective, RouteSlice};

/// Character cursor shared by the hints and route grammars.
/// Hints tolerate whitespace between tokens; routes do not.
struct Cursor {
    chars: Vec<char>,
    pos: usize,
    skip_whitespace: bool,
}

impl Cursor {
    fn new(text: &str, skip_whitespace: bool) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            skip_whitespace,
        }
    }

    fn skip(&mut self) {
        if self.skip_whitespace {
            while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
                self.pos += 1;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip();
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    fn error(&self, message: impl Into<String>) -> LiantError {
        LiantError::GrammarError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn at_end(&mut self) -> bool {
        self.peek().is_none()
    }

    /// Longest run of characters accepted by `accept`, starting at the cursor
    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.chars.get(self.pos).is_some_and(|c| accept(*c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn identifier(&mut self) -> Result<String> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                Ok(self.take_while(|c| c.is_ascii_alphanumeric() || c == '_'))
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn integer(&mut self) -> Result<i64> {
        self.skip();
        let start = self.pos;
        let negative = self.eat('-');
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            self.pos = start;
            return Err(self.error("expected integer"));
        }
        let text = if negative { format!("-{}", digits) } else { digits };
        text.parse().map_err(|_| LiantError::GrammarError {
            position: start,
            message: "integer out of range".to_string(),
        })
    }

    fn hints(&mut self) -> Result<Vec<HintNode>> {
        let mut items = vec![self.hint()?];
        while self.eat(',') {
            items.push(self.hint()?);
        }
        Ok(items)
    }

    fn hint(&mut self) -> Result<HintNode> {
        match self.peek() {
            Some(op @ ('+' | '-')) => {
                self.pos += 1;
                Ok(HintNode::Field {
                    name: self.identifier()?,
                    include: op == '+',
                })
            }
            Some('*') => {
                self.pos += 1;
                let name = self.identifier()?;
                let children = if self.eat('(') {
                    let children = self.hints()?;
                    self.expect(')')?;
                    children
                } else {
                    Vec::new()
                };
                Ok(HintNode::Collection { name, children })
            }
            Some('!') => {
                self.pos += 1;
                let cast = self.cast_token()?;
                self.expect('(')?;
                let children = self.hints()?;
                self.expect(')')?;
                Ok(HintNode::Cast { cast, children })
            }
            _ => Err(self.error("expected one of '+', '-', '*', '!'")),
        }
    }

    /// Subtype designator: an identifier or a run of digits
    fn cast_token(&mut self) -> Result<String> {
        match self.peek() {
            Some(c) if c.is_ascii_digit() => Ok(self.take_while(|c| c.is_ascii_digit())),
            _ => self.identifier(),
        }
    }

    fn pkey(&mut self) -> Result<String> {
        let part = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
        if part.is_empty() {
            return Err(self.error("expected primary key value"));
        }
        Ok(part)
    }

    fn slice(&mut self) -> Result<RouteSlice> {
        let start = self.integer()?;
        if self.eat(':') {
            let stop = self.integer()?;
            Ok(RouteSlice::Range(start, stop))
        } else {
            Ok(RouteSlice::Index(start))
        }
    }

    fn route(&mut self) -> Result<RouteDirective> {
        let mut route = RouteDirective {
            verb: self.identifier()?,
            ..Default::default()
        };
        if self.eat('!') {
            route.cast = Some(self.cast_token()?);
        }
        if self.eat('@') {
            let mut parts = vec![self.pkey()?];
            while self.eat(',') {
                parts.push(self.pkey()?);
            }
            route.pkey = Some(parts);
        }
        if self.eat('/') {
            route.drilldown = Some(self.identifier()?);
        }
        if self.eat('[') {
            route.slice = Some(self.slice()?);
            self.expect(']')?;
        }
        if self.eat(':') {
            self.skip_whitespace = true;
            route.hints = self.hints()?;
        }
        Ok(route)
    }

    fn finish(&mut self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }
}

/// Parse `+field,-field,*relation(hints),!subtype(hints)`
pub fn parse_hints(text: &str) -> Result<Vec<HintNode>> {
    let mut cursor = Cursor::new(text, true);
    let hints = cursor.hints()?;
    cursor.finish()?;
    Ok(hints)
}

/// Parse `verb!cast@pk,pk/drilldown[slice]:hints`
pub fn parse_route(text: &str) -> Result<RouteDirective> {
    let mut cursor = Cursor::new(text, false);
    let route = cursor.route()?;
    cursor.finish()?;
    Ok(route)
}
