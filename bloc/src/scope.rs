use std::collections::HashMap;

use crate::ast::{BlockId, Span};
use crate::error::CompileError;
use crate::program::{CType, Place};

/// One resolved struct field.
#[derive(Debug, Clone)]
pub struct FieldSym {
    pub name: String,
    pub ctype: CType,
    pub is_reference: bool,
}

/// A struct registered in some scope. `ref_paths` lists the dotted paths
/// to every reference-typed slot reachable through value fields, direct
/// reference fields first, then paths through nested record fields.
#[derive(Debug, Clone)]
pub struct StructSym {
    pub mangled: String,
    pub fields: Vec<FieldSym>,
    pub ref_paths: Vec<Vec<String>>,
}

/// Where a binding lives in the generated program.
#[derive(Debug, Clone)]
pub enum VarLoc {
    /// A block-local variable under its mangled name.
    Var(String),
    /// A field of a struct's default instance.
    Field { instance: String, field: String },
}

/// A variable registered in some scope.
#[derive(Debug, Clone)]
pub struct VarSym {
    pub loc: VarLoc,
    pub ctype: CType,
    pub is_reference: bool,
    /// Block whose exit releases anything this binding comes to own.
    pub declared_in: BlockId,
}

impl VarSym {
    pub fn place(&self) -> Place {
        match &self.loc {
            VarLoc::Var(name) => Place::var(name.clone()),
            VarLoc::Field { instance, field } => Place {
                var: instance.clone(),
                fields: vec![field.clone()],
                deref: false,
            },
        }
    }
}

/// A lexical scope. Each block's scope owns fresh tables and holds only a
/// read-only handle to its parent; struct and variable namespaces are
/// independent, and lookup walks outward (an inner definition hides an
/// outer one of the same name without destroying it).
pub struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    pub block: BlockId,
    /// Struct field defaults see only sibling fields, not enclosing-block
    /// variables; types still resolve through the chain.
    vars_local_only: bool,
    structs: HashMap<String, StructSym>,
    variables: HashMap<String, VarSym>,
}

impl<'p> Scope<'p> {
    pub fn new(parent: Option<&'p Scope<'p>>, block: BlockId) -> Self {
        Scope {
            parent,
            block,
            vars_local_only: false,
            structs: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Child scope for resolving a struct's field block.
    pub fn fields(parent: &'p Scope<'p>) -> Self {
        Scope {
            parent: Some(parent),
            block: parent.block,
            vars_local_only: true,
            structs: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn define_struct(
        &mut self,
        name: &str,
        sym: StructSym,
        span: Span,
        file_id: usize,
    ) -> Result<(), CompileError> {
        if self.structs.contains_key(name) {
            return Err(CompileError::definition(
                format!("struct '{}' already defined in this scope", name),
                span,
                file_id,
            ));
        }
        self.structs.insert(name.to_string(), sym);
        Ok(())
    }

    pub fn define_variable(
        &mut self,
        name: &str,
        sym: VarSym,
        span: Span,
        file_id: usize,
    ) -> Result<(), CompileError> {
        if self.variables.contains_key(name) {
            return Err(CompileError::definition(
                format!("variable '{}' already defined in this scope", name),
                span,
                file_id,
            ));
        }
        self.variables.insert(name.to_string(), sym);
        Ok(())
    }

    pub fn has_local_struct(&self, name: &str) -> bool {
        self.structs.contains_key(name)
    }

    pub fn has_local_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn lookup_struct(&self, name: &str) -> Option<&StructSym> {
        if let Some(sym) = self.structs.get(name) {
            return Some(sym);
        }
        self.parent?.lookup_struct(name)
    }

    pub fn lookup_variable(&self, name: &str) -> Option<&VarSym> {
        if let Some(sym) = self.variables.get(name) {
            return Some(sym);
        }
        if self.vars_local_only {
            return None;
        }
        self.parent?.lookup_variable(name)
    }
}

/// Qualify a surface name with its declaring block for the flat target
/// namespace: `_{name}_at_b{id}`.
pub fn mangle(name: &str, block: BlockId) -> String {
    format!("_{}_at_{}", name, block)
}
