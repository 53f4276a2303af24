//! The lowered program handed from the resolve/lifetime traversal to the
//! code generator: record declarations, reference-wrapper declarations,
//! and per-block instruction lists in which every reference-count effect
//! is an explicit instruction. Codegen consumes this mechanically; the
//! runtime crate's simulator executes the same effects against an
//! instrumented heap.

use crate::ast::BlockId;
use crate::types::Primitive;

/// A type as it appears in the output: a primitive typedef or a mangled
/// record name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Prim(Primitive),
    Record(String),
}

impl CType {
    pub fn c_name(&self) -> String {
        match self {
            CType::Prim(p) => p.c_name(),
            CType::Record(name) => name.clone(),
        }
    }

    /// Tag used in reference-wrapper function names.
    pub fn wrapper_tag(&self) -> String {
        match self {
            CType::Prim(p) => p.name().to_string(),
            CType::Record(name) => name.trim_start_matches('_').to_string(),
        }
    }
}

/// One fixed-layout record declaration.
#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub name: String,
    pub fields: Vec<RecordField>,
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: String,
    pub ctype: CType,
    pub is_reference: bool,
}

/// One reference-wrapper declaration: the allocation function for a base
/// type, emitted once per base type actually used.
#[derive(Debug, Clone)]
pub struct WrapperDecl {
    pub tag: String,
    pub base: CType,
}

impl WrapperDecl {
    pub fn func_name(&self) -> String {
        format!("_alloc_{}", self.tag)
    }
}

/// A storage location in the output: a variable, optionally narrowed by
/// field selection, optionally through a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Place {
    pub var: String,
    pub fields: Vec<String>,
    pub deref: bool,
}

impl Place {
    pub fn var(name: String) -> Self {
        Place {
            var: name,
            fields: Vec::new(),
            deref: false,
        }
    }

    pub fn deref(mut self) -> Self {
        self.deref = true;
        self
    }

    /// Canonical identity for slot tracking; also the emitted C text.
    pub fn render(&self) -> String {
        if self.fields.is_empty() {
            if self.deref {
                format!("*{}", self.var)
            } else {
                self.var.clone()
            }
        } else if self.deref {
            format!("{}->{}", self.var, self.fields.join("."))
        } else {
            format!("{}.{}", self.var, self.fields.join("."))
        }
    }

    /// Slot key: ignores deref so `x` and `*x` identify the same binding.
    pub fn key(&self) -> String {
        if self.fields.is_empty() {
            self.var.clone()
        } else {
            format!("{}.{}", self.var, self.fields.join("."))
        }
    }
}

/// A renderable right-hand side.
#[derive(Debug, Clone)]
pub enum Value {
    /// Already-suffixed literal text.
    Literal(String),
    Place(Place),
    /// Null for reference slots, zero for value slots.
    Zero,
}

impl Value {
    pub fn render(&self) -> String {
        match self {
            Value::Literal(text) => text.clone(),
            Value::Place(place) => place.render(),
            Value::Zero => "0".to_string(),
        }
    }
}

/// One lowered statement. Each variant renders as exactly one C statement.
#[derive(Debug, Clone)]
pub enum Instr {
    /// `T name;` / `T *name;`
    Declare {
        name: String,
        ctype: CType,
        is_reference: bool,
    },
    /// `dst = value;` with no reference-count effect of its own; pointer
    /// moves are always preceded by the matching Retain/Release.
    Store { dst: Place, value: Value },
    /// `dst = _alloc_tag(value);`: a fresh cell, count starting at 1.
    AllocStore {
        dst: Place,
        wrapper: String,
        value: Value,
    },
    /// `add_ref(place);`
    Retain { place: Place },
    /// `remove_ref(place);`
    Release { place: Place },
    /// `value;`: a standalone expression statement.
    Eval { value: Value },
    /// `Record name = { .f = v, ... };`: the struct's memoized default
    /// instance. Reference fields and sibling copies are assigned by the
    /// instructions that follow it.
    DefaultInstance {
        record: String,
        name: String,
        fields: Vec<(String, Value)>,
    },
    /// A nested lexical scope.
    Nested(LoweredBlock),
}

/// One source block, lowered. `exit_releases` are the block's cleanup
/// decrements, in the order the released slots were first written.
#[derive(Debug, Clone)]
pub struct LoweredBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    pub exit_releases: Vec<Place>,
}

/// The whole lowered program. Records and wrappers are in first-use order.
#[derive(Debug, Clone)]
pub struct Program {
    pub records: Vec<RecordDecl>,
    pub wrappers: Vec<WrapperDecl>,
    pub root: LoweredBlock,
}
