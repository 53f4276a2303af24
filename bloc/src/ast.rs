use std::fmt;
use std::ops::Range;

/// Byte span in the source, for error reporting.
pub type Span = Range<usize>;

/// Arena index of a block, assigned by the parser in the order blocks are
/// entered (root = 0). Reused verbatim for name mangling, so identical
/// source always produces identical output names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A lexical scope: an ordered sequence of commands.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub commands: Vec<Command>,
    pub span: Span,
}

/// A type as written in source. The `@` sigil marks a reference type and is
/// stripped before storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub name: String,
    pub is_reference: bool,
}

/// One parsed command. `Block` is a nested lexical scope in statement
/// position; the remaining variants follow the surface grammar.
#[derive(Debug, Clone)]
pub enum Command {
    VariableDefine(VariableDefine),
    VariableSet(VariableSet),
    VariableGet(VariableGet),
    StructDefine(StructDefine),
    NumberLiteral(NumberLiteral),
    Allocate(Allocate),
    Block(Block),
}

impl Command {
    pub fn span(&self) -> Span {
        match self {
            Command::VariableDefine(c) => c.span.clone(),
            Command::VariableSet(c) => c.span.clone(),
            Command::VariableGet(c) => c.span.clone(),
            Command::StructDefine(c) => c.span.clone(),
            Command::NumberLiteral(c) => c.span.clone(),
            Command::Allocate(c) => c.span.clone(),
            Command::Block(b) => b.span.clone(),
        }
    }

    /// Short human name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Command::VariableDefine(_) => "variable definition",
            Command::VariableSet(_) => "assignment",
            Command::VariableGet(_) => "variable read",
            Command::StructDefine(_) => "struct definition",
            Command::NumberLiteral(_) => "number literal",
            Command::Allocate(_) => "allocation",
            Command::Block(_) => "block",
        }
    }
}

/// `name ':' type ['=' value]`: defines a binding in the enclosing scope.
/// Also used for struct fields.
#[derive(Debug, Clone)]
pub struct VariableDefine {
    pub name: String,
    pub ty: TypeName,
    pub value: Option<Box<Command>>,
    pub span: Span,
}

/// `name '=' value`: reassignment of an existing binding.
#[derive(Debug, Clone)]
pub struct VariableSet {
    pub name: String,
    pub value: Box<Command>,
    pub span: Span,
}

/// A read of an existing binding.
#[derive(Debug, Clone)]
pub struct VariableGet {
    pub name: String,
    pub span: Span,
}

/// `['@']name '{' field* '}'`. Inline struct definitions found in type
/// position are hoisted to the enclosing block by the parser, so structs
/// are always siblings at scope level.
#[derive(Debug, Clone)]
pub struct StructDefine {
    pub name: String,
    pub fields: Vec<VariableDefine>,
    pub span: Span,
}

/// A run of digits with at most one decimal point. `is_float` drives
/// type-directed suffixing during lowering.
#[derive(Debug, Clone)]
pub struct NumberLiteral {
    pub text: String,
    pub is_float: bool,
    pub span: Span,
}

/// `alloc value`: this write creates a brand-new heap cell rather than
/// aliasing an existing one. Legal only as the right-hand side of a write
/// whose target is reference-typed.
#[derive(Debug, Clone)]
pub struct Allocate {
    pub value: Box<Command>,
    pub span: Span,
}
