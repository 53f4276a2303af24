pub mod ast;
pub mod codegen;
pub mod error;
pub mod lower;
pub mod parser;
pub mod program;
pub mod scope;
pub mod types;

pub use error::{CompileError, ErrorKind};
pub use program::Program;

/// Compile bloc source to the target C text. Pure and fail-fast: the
/// first error aborts the whole compilation and no partial output is
/// produced.
pub fn compile(source: &str, file_id: usize) -> Result<String, CompileError> {
    Ok(codegen::emit(&lower_source(source, file_id)?))
}

/// Parse, resolve, and lower without emitting. The lowered program drives
/// both the code generator and the runtime crate's lifetime simulator.
pub fn lower_source(source: &str, file_id: usize) -> Result<Program, CompileError> {
    let root = parser::Parser::new(source.to_string(), file_id).parse()?;
    lower::lower(&root, file_id)
}
