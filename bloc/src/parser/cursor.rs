use crate::ast::Span;
use crate::error::CompileError;

/// Characters that open a block. The two bracket styles are
/// interchangeable.
pub const BLOCK_OPEN: &[u8] = b"{(";
/// Characters that close a block. End of input also closes every open
/// block implicitly.
pub const BLOCK_CLOSE: &[u8] = b"})";

/// Byte cursor over the source. Lexing is interleaved with parsing; there
/// is no token stream, and whitespace is insignificant everywhere.
pub struct Cursor<'a> {
    src: &'a [u8],
    pub pos: usize,
    file_id: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str, file_id: usize) -> Self {
        Cursor {
            src: source.as_bytes(),
            pos: 0,
            file_id,
        }
    }

    pub fn skip_whitespace(&mut self) {
        while let Some(&b) = self.src.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Skip whitespace, then consume and return the next byte. Returns 0 at
    /// end of input without advancing.
    pub fn next_char(&mut self) -> u8 {
        self.skip_whitespace();
        match self.src.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => 0,
        }
    }

    /// Skip whitespace and return the next byte without consuming it.
    /// Returns 0 at end of input.
    pub fn peek_char(&mut self) -> u8 {
        self.skip_whitespace();
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    /// Raw byte at the cursor, no whitespace skipping. 0 at end of input.
    pub fn peek_raw(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    /// A word is a run of ASCII letters and digits.
    pub fn expect_word(&mut self) -> Result<String, CompileError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(&b) = self.src.get(self.pos) {
            if b.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error(match self.src.get(self.pos) {
                Some(&b) => format!("expected a word but found '{}'", b as char),
                None => "expected a word but reached end of input".to_string(),
            }));
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    /// Consume the next non-space byte and require it to be one of `set`.
    pub fn expect_char(&mut self, set: &[u8], what: &str) -> Result<u8, CompileError> {
        let at = {
            self.skip_whitespace();
            self.pos
        };
        let c = self.next_char();
        if set.contains(&c) && c != 0 {
            Ok(c)
        } else if c == 0 {
            Err(CompileError::syntax(
                format!("expected {} but reached end of input", what),
                at..at,
                self.file_id,
            ))
        } else {
            Err(CompileError::syntax(
                format!("expected {} but found '{}'", what, c as char),
                at..at + 1,
                self.file_id,
            ))
        }
    }

    pub fn span_at(&self) -> Span {
        self.pos..(self.pos + 1).min(self.src.len().max(self.pos))
    }

    pub fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.span_at(), self.file_id)
    }
}
