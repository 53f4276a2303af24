use crate::ast::{
    Allocate, Block, BlockId, Command, NumberLiteral, StructDefine, TypeName, VariableDefine,
    VariableGet, VariableSet,
};
use crate::error::CompileError;
use crate::parser::cursor::{BLOCK_CLOSE, BLOCK_OPEN, Cursor};

/// The reference sigil. A type name starting with it is a reference type;
/// the sigil is stripped before storage.
const SIGIL: u8 = b'@';

/// Recursive-descent state: the cursor plus the block id arena. Block ids
/// are handed out in the order blocks are entered, so identical source
/// always gets identical ids.
pub(crate) struct ScriptParser<'a> {
    cur: Cursor<'a>,
    next_block: usize,
}

impl<'a> ScriptParser<'a> {
    pub fn new(source: &'a str, file_id: usize) -> Self {
        ScriptParser {
            cur: Cursor::new(source, file_id),
            next_block: 0,
        }
    }

    /// Byte offset reached so far; used to attach the consumed prefix to
    /// errors.
    pub fn consumed(&self) -> usize {
        self.cur.pos
    }

    /// The whole script is one outermost block.
    pub fn parse_root(&mut self) -> Result<Block, CompileError> {
        self.cur.skip_whitespace();
        let start = self.cur.pos;
        self.cur.expect_char(BLOCK_OPEN, "a block opener")?;
        self.parse_block(start)
    }

    /// Commands until a closer (or end of input, which closes implicitly).
    /// The opener has already been consumed.
    fn parse_block(&mut self, start: usize) -> Result<Block, CompileError> {
        let id = BlockId(self.next_block);
        self.next_block += 1;

        let mut commands = Vec::new();
        loop {
            let c = self.cur.peek_char();
            if c == 0 {
                break;
            }
            if BLOCK_CLOSE.contains(&c) {
                self.cur.advance();
                break;
            }
            let mut hoisted = Vec::new();
            let command = self.parse_command(&mut hoisted)?;
            // Inline struct definitions discovered inside the command are
            // siblings at scope level, placed ahead of their first use.
            commands.extend(hoisted);
            commands.push(command);
        }

        Ok(Block {
            id,
            commands,
            span: start..self.cur.pos,
        })
    }

    /// One token of lookahead past the leading word decides the production.
    fn parse_command(&mut self, hoist: &mut Vec<Command>) -> Result<Command, CompileError> {
        let c = self.cur.peek_char();
        if BLOCK_OPEN.contains(&c) {
            let start = self.cur.pos;
            self.cur.advance();
            return Ok(Command::Block(self.parse_block(start)?));
        }

        let word_start = self.cur.pos;
        let word = self.cur.expect_word()?;
        match word.as_str() {
            "var" => Ok(Command::VariableDefine(self.parse_variable_define(hoist)?)),
            "set" => Ok(Command::VariableSet(self.parse_variable_set(hoist)?)),
            "get" => Ok(Command::VariableGet(self.parse_variable_get()?)),
            "struct" => Ok(Command::StructDefine(self.parse_struct_define(hoist)?)),
            "alloc" => {
                let value = self.parse_command(hoist)?;
                Ok(Command::Allocate(Allocate {
                    value: Box::new(value),
                    span: word_start..self.cur.pos,
                }))
            }
            _ => match self.cur.peek_char() {
                b':' => {
                    self.cur.pos = word_start;
                    Ok(Command::VariableDefine(self.parse_variable_define(hoist)?))
                }
                b'=' => {
                    self.cur.pos = word_start;
                    Ok(Command::VariableSet(self.parse_variable_set(hoist)?))
                }
                _ => {
                    if word.bytes().all(|b| b.is_ascii_digit()) {
                        self.cur.pos = word_start;
                        Ok(Command::NumberLiteral(self.parse_number()?))
                    } else {
                        Ok(Command::VariableGet(VariableGet {
                            name: word,
                            span: word_start..self.cur.pos,
                        }))
                    }
                }
            },
        }
    }

    /// `name ':' type ['=' value]`
    fn parse_variable_define(
        &mut self,
        hoist: &mut Vec<Command>,
    ) -> Result<VariableDefine, CompileError> {
        self.cur.skip_whitespace();
        let start = self.cur.pos;
        let name = self.cur.expect_word()?;
        self.cur.expect_char(b":", "':'")?;
        let ty = self.parse_type(hoist)?;
        let value = if self.cur.peek_char() == b'=' {
            self.cur.advance();
            Some(Box::new(self.parse_command(hoist)?))
        } else {
            None
        };
        Ok(VariableDefine {
            name,
            ty,
            value,
            span: start..self.cur.pos,
        })
    }

    /// `name '=' value`
    fn parse_variable_set(&mut self, hoist: &mut Vec<Command>) -> Result<VariableSet, CompileError> {
        self.cur.skip_whitespace();
        let start = self.cur.pos;
        let name = self.cur.expect_word()?;
        self.cur.expect_char(b"=", "'='")?;
        let value = self.parse_command(hoist)?;
        Ok(VariableSet {
            name,
            value: Box::new(value),
            span: start..self.cur.pos,
        })
    }

    fn parse_variable_get(&mut self) -> Result<VariableGet, CompileError> {
        self.cur.skip_whitespace();
        let start = self.cur.pos;
        let name = self.cur.expect_word()?;
        Ok(VariableGet {
            name,
            span: start..self.cur.pos,
        })
    }

    /// A type is a word, optionally prefixed with the reference sigil; or
    /// an inline struct definition, which is hoisted to the enclosing
    /// block under a name synthesized from its source offset.
    fn parse_type(&mut self, hoist: &mut Vec<Command>) -> Result<TypeName, CompileError> {
        let mut is_reference = false;
        if self.cur.peek_char() == SIGIL {
            self.cur.advance();
            is_reference = true;
        }
        if BLOCK_OPEN.contains(&self.cur.peek_char()) {
            let offset = self.cur.pos;
            self.cur.advance();
            let name = format!("anon_{}", offset);
            let fields = self.parse_struct_fields(hoist)?;
            hoist.push(Command::StructDefine(StructDefine {
                name: name.clone(),
                fields,
                span: offset..self.cur.pos,
            }));
            return Ok(TypeName { name, is_reference });
        }
        let name = self.cur.expect_word()?;
        Ok(TypeName { name, is_reference })
    }

    /// `['@']name '{' field* '}'`. The keyword has already been consumed;
    /// a sigil before the name is tolerated and stripped.
    fn parse_struct_define(
        &mut self,
        hoist: &mut Vec<Command>,
    ) -> Result<StructDefine, CompileError> {
        self.cur.skip_whitespace();
        let start = self.cur.pos;
        if self.cur.peek_char() == SIGIL {
            self.cur.advance();
        }
        let name = self.cur.expect_word()?;
        self.cur.expect_char(BLOCK_OPEN, "a block opener")?;
        let fields = self.parse_struct_fields(hoist)?;
        Ok(StructDefine {
            name,
            fields,
            span: start..self.cur.pos,
        })
    }

    /// Fields until a closer. Inline struct types found in field position
    /// hoist to the enclosing *block*, not the struct.
    fn parse_struct_fields(
        &mut self,
        hoist: &mut Vec<Command>,
    ) -> Result<Vec<VariableDefine>, CompileError> {
        let mut fields = Vec::new();
        loop {
            let c = self.cur.peek_char();
            if c == 0 {
                break;
            }
            if BLOCK_CLOSE.contains(&c) {
                self.cur.advance();
                break;
            }
            fields.push(self.parse_variable_define(hoist)?);
        }
        Ok(fields)
    }

    /// A run of digits with at most one decimal point.
    fn parse_number(&mut self) -> Result<NumberLiteral, CompileError> {
        self.cur.skip_whitespace();
        let start = self.cur.pos;
        let mut text = String::new();
        let mut seen_dot = false;
        loop {
            let b = self.cur.peek_raw();
            if b.is_ascii_digit() {
                text.push(b as char);
                self.cur.advance();
            } else if b == b'.' {
                if seen_dot {
                    return Err(self.cur.error("second decimal point in number literal"));
                }
                seen_dot = true;
                text.push('.');
                self.cur.advance();
            } else {
                break;
            }
        }
        Ok(NumberLiteral {
            text,
            is_float: seen_dot,
            span: start..self.cur.pos,
        })
    }
}
