mod commands;
mod cursor;

use crate::ast::Block;
use crate::error::CompileError;
use commands::ScriptParser;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Parse the source into the root Block. Fail-fast: the first
    /// malformed construct aborts the parse, with the consumed source
    /// prefix attached to the error for diagnostics.
    pub fn parse(&self) -> Result<Block, CompileError> {
        let mut parser = ScriptParser::new(&self.source, self.file_id);
        parser.parse_root().map_err(|err| {
            let consumed = parser.consumed().min(self.source.len());
            err.with_note(consumed_prefix(&self.source, consumed))
        })
    }
}

/// A short tail of the source consumed before the error was raised.
fn consumed_prefix(source: &str, consumed: usize) -> String {
    let bytes = &source.as_bytes()[..consumed];
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    const TAIL: usize = 60;
    let tail: String = if trimmed.chars().count() > TAIL {
        let skip = trimmed.chars().count() - TAIL;
        format!("…{}", trimmed.chars().skip(skip).collect::<String>())
    } else {
        trimmed.to_string()
    };
    format!("after reading: {}", tail)
}
