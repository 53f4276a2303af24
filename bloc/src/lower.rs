//! The resolve + lifetime traversal: a single top-down walk over the
//! parsed tree that checks names and types against the scope chain,
//! decides every allocate/increment/decrement, and produces the lowered
//! program for codegen.
//!
//! Ownership of heap cells is tracked statically per reference slot (a
//! reference-typed binding, or a reference-typed field path of a record
//! binding). The language has no control flow, so the tracking is exact:
//! a slot is owned from its first alloc or alias write until the exit of
//! the block its binding was declared in. Alias writes increment the
//! source cell before the destination's old cell is released, which keeps
//! self-aliasing safe.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    Block, BlockId, Command, NumberLiteral, Span, StructDefine, TypeName, VariableDefine,
    VariableGet, VariableSet,
};
use crate::error::CompileError;
use crate::program::{
    CType, Instr, LoweredBlock, Place, Program, RecordDecl, RecordField, Value, WrapperDecl,
};
use crate::scope::{FieldSym, Scope, StructSym, VarLoc, VarSym, mangle};
use crate::types::Primitive;

pub fn lower(root: &Block, file_id: usize) -> Result<Program, CompileError> {
    let mut lowerer = Lowerer {
        file_id,
        records: Vec::new(),
        record_meta: HashMap::new(),
        wrappers: Vec::new(),
        wrapper_seen: HashSet::new(),
        owned: HashSet::new(),
        cleanup: HashMap::new(),
    };
    let root_block = lowerer.lower_block(root, None)?;
    Ok(Program {
        records: lowerer.records,
        wrappers: lowerer.wrappers,
        root: root_block,
    })
}

struct Lowerer {
    file_id: usize,
    records: Vec<RecordDecl>,
    /// Mangled record name -> symbol, for field paths and copy bookkeeping.
    record_meta: HashMap<String, StructSym>,
    wrappers: Vec<WrapperDecl>,
    wrapper_seen: HashSet<String>,
    /// Slot keys that currently own a heap cell.
    owned: HashSet<String>,
    /// Per declaring block: owned slots in first-write order. Drained into
    /// the block's exit releases.
    cleanup: HashMap<usize, Vec<Place>>,
}

impl Lowerer {
    fn lower_block<'p>(
        &mut self,
        block: &Block,
        parent: Option<&'p Scope<'p>>,
    ) -> Result<LoweredBlock, CompileError> {
        let mut scope = Scope::new(parent, block.id);
        let mut instrs = Vec::new();
        for command in &block.commands {
            self.lower_command(command, &mut scope, &mut instrs)?;
        }
        let exit_releases = self
            .cleanup
            .remove(&block.id.0)
            .unwrap_or_default()
            .into_iter()
            .filter(|place| self.owned.remove(&place.key()))
            .collect();
        Ok(LoweredBlock {
            id: block.id,
            instrs,
            exit_releases,
        })
    }

    fn lower_command(
        &mut self,
        command: &Command,
        scope: &mut Scope<'_>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        match command {
            Command::StructDefine(sd) => self.lower_struct_define(sd, scope, instrs),
            Command::VariableDefine(vd) => self.lower_variable_define(vd, scope, instrs),
            Command::VariableSet(vs) => self.lower_variable_set(vs, scope, instrs),
            Command::VariableGet(vg) => {
                let sym = self.resolve_variable(vg, scope)?;
                instrs.push(Instr::Eval {
                    value: Value::Place(sym.place()),
                });
                Ok(())
            }
            Command::NumberLiteral(n) => {
                // No destination slot, so no type-directed suffixing.
                instrs.push(Instr::Eval {
                    value: Value::Literal(n.text.clone()),
                });
                Ok(())
            }
            Command::Allocate(a) => Err(CompileError::type_error(
                "allocation is only legal as the value of a reference-typed write",
                a.span.clone(),
                self.file_id,
            )),
            Command::Block(b) => {
                let nested = self.lower_block(b, Some(&*scope))?;
                instrs.push(Instr::Nested(nested));
                Ok(())
            }
        }
    }

    fn lower_struct_define(
        &mut self,
        sd: &StructDefine,
        scope: &mut Scope<'_>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        if scope.has_local_struct(&sd.name) {
            return Err(CompileError::definition(
                format!("struct '{}' already defined in this scope", sd.name),
                sd.span.clone(),
                self.file_id,
            ));
        }

        let mangled = mangle(&sd.name, scope.block);
        let default_name = format!("{}_default", mangled);
        let block = scope.block;

        let mut rec_fields = Vec::new();
        let mut field_syms = Vec::new();
        let mut literal_fields = Vec::new();
        let mut post = Vec::new();
        {
            // Fields resolve their types through the enclosing chain, but
            // their defaults see only sibling fields.
            let mut field_scope = Scope::fields(scope);
            for field in &sd.fields {
                let (ctype, is_reference) =
                    self.resolve_type(&field.ty, &field_scope, field.span.clone())?;
                if is_reference {
                    self.ensure_wrapper(&ctype, field.span.clone())?;
                }
                let sym = VarSym {
                    loc: VarLoc::Field {
                        instance: default_name.clone(),
                        field: field.name.clone(),
                    },
                    ctype: ctype.clone(),
                    is_reference,
                    declared_in: block,
                };
                field_scope.define_variable(&field.name, sym.clone(), field.span.clone(), self.file_id)?;
                rec_fields.push(RecordField {
                    name: field.name.clone(),
                    ctype: ctype.clone(),
                    is_reference,
                });
                field_syms.push(FieldSym {
                    name: field.name.clone(),
                    ctype,
                    is_reference,
                });
                if let Some(value) = &field.value {
                    match value.as_ref() {
                        // Value literals go straight into the compound
                        // literal; everything else (allocations, sibling
                        // copies) is assigned after it.
                        Command::NumberLiteral(n) if !sym.is_reference => {
                            let text = self.render_for(&sym.ctype, n)?;
                            literal_fields.push((field.name.clone(), Value::Literal(text)));
                        }
                        other => self.lower_write(&sym, other, &field_scope, &mut post)?,
                    }
                }
            }
        }

        let mut ref_paths = Vec::new();
        for field in &field_syms {
            if field.is_reference {
                ref_paths.push(vec![field.name.clone()]);
            } else if let CType::Record(inner) = &field.ctype {
                let meta = self.record_meta.get(inner).expect("record metadata");
                for path in &meta.ref_paths {
                    let mut full = vec![field.name.clone()];
                    full.extend(path.iter().cloned());
                    ref_paths.push(full);
                }
            }
        }

        let sym = StructSym {
            mangled: mangled.clone(),
            fields: field_syms,
            ref_paths,
        };
        self.records.push(RecordDecl {
            name: mangled.clone(),
            fields: rec_fields,
        });
        self.record_meta.insert(mangled.clone(), sym.clone());
        scope.define_struct(&sd.name, sym, sd.span.clone(), self.file_id)?;

        instrs.push(Instr::DefaultInstance {
            record: mangled,
            name: default_name,
            fields: literal_fields,
        });
        instrs.extend(post);
        Ok(())
    }

    fn lower_variable_define(
        &mut self,
        vd: &VariableDefine,
        scope: &mut Scope<'_>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        if scope.has_local_variable(&vd.name) {
            return Err(CompileError::definition(
                format!("variable '{}' already defined in this scope", vd.name),
                vd.span.clone(),
                self.file_id,
            ));
        }
        let (ctype, is_reference) = self.resolve_type(&vd.ty, scope, vd.span.clone())?;
        if is_reference {
            self.ensure_wrapper(&ctype, vd.span.clone())?;
        }
        let mangled = mangle(&vd.name, scope.block);
        let sym = VarSym {
            loc: VarLoc::Var(mangled.clone()),
            ctype: ctype.clone(),
            is_reference,
            declared_in: scope.block,
        };
        scope.define_variable(&vd.name, sym.clone(), vd.span.clone(), self.file_id)?;
        instrs.push(Instr::Declare {
            name: mangled,
            ctype: ctype.clone(),
            is_reference,
        });

        match &vd.value {
            Some(value) => self.lower_write(&sym, value, scope, instrs),
            None => {
                if is_reference {
                    // No initializer: a null binding that owns nothing
                    // until something is assigned into it.
                    instrs.push(Instr::Store {
                        dst: sym.place(),
                        value: Value::Zero,
                    });
                } else if let CType::Record(rec) = &ctype {
                    let rec = rec.clone();
                    let default_place = Place::var(format!("{}_default", rec));
                    self.copy_record(&sym, &default_place, &rec, instrs);
                } else {
                    instrs.push(Instr::Store {
                        dst: sym.place(),
                        value: Value::Zero,
                    });
                }
                Ok(())
            }
        }
    }

    fn lower_variable_set(
        &mut self,
        vs: &VariableSet,
        scope: &mut Scope<'_>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        let sym = match scope.lookup_variable(&vs.name) {
            Some(sym) => sym.clone(),
            None => {
                return Err(CompileError::resolution(
                    format!("variable '{}' not found", vs.name),
                    vs.span.clone(),
                    self.file_id,
                ));
            }
        };
        self.lower_write(&sym, &vs.value, scope, instrs)
    }

    /// Lower a write into `target` (a definition initializer, an
    /// assignment, or a struct field default). All reference-count
    /// decisions are made here.
    fn lower_write(
        &mut self,
        target: &VarSym,
        value: &Command,
        scope: &Scope<'_>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        let dst = target.place();
        if target.is_reference {
            match value {
                Command::Allocate(a) => {
                    let tag = self.ensure_wrapper(&target.ctype, a.span.clone())?;
                    let payload = self.lower_alloc_payload(&a.value, &target.ctype, scope)?;
                    if self.is_owned(&dst) {
                        instrs.push(Instr::Release { place: dst.clone() });
                    }
                    instrs.push(Instr::AllocStore {
                        dst: dst.clone(),
                        wrapper: tag,
                        value: payload,
                    });
                    self.mark_owned(dst, target.declared_in);
                    Ok(())
                }
                Command::VariableGet(g) => {
                    let src = self.resolve_variable(g, scope)?;
                    if src.is_reference {
                        let src_place = src.place();
                        if self.is_owned(&src_place) {
                            // Alias: increment the source cell before the
                            // destination's old cell is released, so a
                            // self-alias never transiently frees the cell.
                            instrs.push(Instr::Retain {
                                place: src_place.clone(),
                            });
                            if self.is_owned(&dst) {
                                instrs.push(Instr::Release { place: dst.clone() });
                            }
                            instrs.push(Instr::Store {
                                dst: dst.clone(),
                                value: Value::Place(src_place),
                            });
                            self.mark_owned(dst, target.declared_in);
                        } else {
                            // Aliasing an unbound reference nulls the
                            // destination.
                            if self.is_owned(&dst) {
                                instrs.push(Instr::Release { place: dst.clone() });
                                self.unmark_owned(&dst);
                            }
                            instrs.push(Instr::Store {
                                dst,
                                value: Value::Zero,
                            });
                        }
                        Ok(())
                    } else {
                        // Write through the reference into its payload.
                        if !self.is_owned(&dst) {
                            return Err(CompileError::type_error(
                                "store through an unbound reference",
                                g.span.clone(),
                                self.file_id,
                            ));
                        }
                        instrs.push(Instr::Store {
                            dst: dst.deref(),
                            value: Value::Place(src.place()),
                        });
                        Ok(())
                    }
                }
                Command::NumberLiteral(n) => {
                    if !self.is_owned(&dst) {
                        return Err(CompileError::type_error(
                            "store through an unbound reference",
                            n.span.clone(),
                            self.file_id,
                        ));
                    }
                    let text = self.render_for(&target.ctype, n)?;
                    instrs.push(Instr::Store {
                        dst: dst.deref(),
                        value: Value::Literal(text),
                    });
                    Ok(())
                }
                other => Err(self.misplaced(other)),
            }
        } else {
            match value {
                Command::NumberLiteral(n) => {
                    let text = self.render_for(&target.ctype, n)?;
                    instrs.push(Instr::Store {
                        dst,
                        value: Value::Literal(text),
                    });
                    Ok(())
                }
                Command::VariableGet(g) => {
                    let src = self.resolve_variable(g, scope)?;
                    if src.is_reference {
                        // Copy the pointee out of the cell.
                        let src_place = src.place();
                        if !self.is_owned(&src_place) {
                            return Err(CompileError::type_error(
                                "read through an unbound reference",
                                g.span.clone(),
                                self.file_id,
                            ));
                        }
                        instrs.push(Instr::Store {
                            dst,
                            value: Value::Place(src_place.deref()),
                        });
                    } else if let (CType::Record(dst_rec), CType::Record(src_rec)) =
                        (&target.ctype, &src.ctype)
                    {
                        if dst_rec == src_rec {
                            let rec = dst_rec.clone();
                            self.copy_record(target, &src.place(), &rec, instrs);
                        } else {
                            instrs.push(Instr::Store {
                                dst,
                                value: Value::Place(src.place()),
                            });
                        }
                    } else {
                        instrs.push(Instr::Store {
                            dst,
                            value: Value::Place(src.place()),
                        });
                    }
                    Ok(())
                }
                Command::Allocate(a) => Err(CompileError::type_error(
                    "allocation requires a reference-typed destination",
                    a.span.clone(),
                    self.file_id,
                )),
                other => Err(self.misplaced(other)),
            }
        }
    }

    /// A record value copy is a single store plus an increment for every
    /// owned reference field path of the source, with the destination's
    /// previously owned paths released after the increments and all
    /// source reads placed before the store overwrites the destination.
    fn copy_record(
        &mut self,
        target: &VarSym,
        src_place: &Place,
        rec: &str,
        instrs: &mut Vec<Instr>,
    ) {
        let paths = self
            .record_meta
            .get(rec)
            .map(|meta| meta.ref_paths.clone())
            .unwrap_or_default();
        let dst_place = target.place();

        let mut moves = Vec::new();
        for path in &paths {
            let src_slot = sub_place(src_place, path);
            let dst_slot = sub_place(&dst_place, path);
            let src_owned = self.is_owned(&src_slot);
            moves.push((src_slot, dst_slot, src_owned));
        }
        for (src_slot, _, src_owned) in &moves {
            if *src_owned {
                instrs.push(Instr::Retain {
                    place: src_slot.clone(),
                });
            }
        }
        for (_, dst_slot, _) in &moves {
            if self.is_owned(dst_slot) {
                instrs.push(Instr::Release {
                    place: dst_slot.clone(),
                });
                self.unmark_owned(dst_slot);
            }
        }
        instrs.push(Instr::Store {
            dst: dst_place,
            value: Value::Place(src_place.clone()),
        });
        for (_, dst_slot, src_owned) in moves {
            if src_owned {
                self.mark_owned(dst_slot, target.declared_in);
            }
        }
    }

    /// The payload expression of an `alloc`.
    fn lower_alloc_payload(
        &mut self,
        value: &Command,
        base: &CType,
        scope: &Scope<'_>,
    ) -> Result<Value, CompileError> {
        match value {
            Command::NumberLiteral(n) => Ok(Value::Literal(self.render_for(base, n)?)),
            Command::VariableGet(g) => {
                let src = self.resolve_variable(g, scope)?;
                if src.is_reference {
                    let place = src.place();
                    if !self.is_owned(&place) {
                        return Err(CompileError::type_error(
                            "read through an unbound reference",
                            g.span.clone(),
                            self.file_id,
                        ));
                    }
                    Ok(Value::Place(place.deref()))
                } else {
                    Ok(Value::Place(src.place()))
                }
            }
            Command::Allocate(a) => Err(CompileError::type_error(
                "allocation is only legal as the direct value of a reference-typed write",
                a.span.clone(),
                self.file_id,
            )),
            other => Err(self.misplaced(other)),
        }
    }

    /// Render a numeric literal against its destination slot's type.
    fn render_for(&self, ctype: &CType, literal: &NumberLiteral) -> Result<String, CompileError> {
        let prim = match ctype {
            CType::Prim(p) => *p,
            CType::Record(name) => {
                return Err(CompileError::type_error(
                    format!("numeric literal cannot initialize struct '{}'", name),
                    literal.span.clone(),
                    self.file_id,
                ));
            }
        };
        crate::types::render_literal(literal, prim).ok_or_else(|| {
            let message = if prim.numeric_kind().is_none() {
                format!("numeric literal into non-numeric slot of type '{}'", prim.name())
            } else {
                format!("fractional literal into integer-typed slot of type '{}'", prim.name())
            };
            CompileError::type_error(message, literal.span.clone(), self.file_id)
        })
    }

    fn resolve_type(
        &self,
        ty: &TypeName,
        scope: &Scope<'_>,
        span: Span,
    ) -> Result<(CType, bool), CompileError> {
        if let Some(prim) = Primitive::from_name(&ty.name) {
            return Ok((CType::Prim(prim), ty.is_reference));
        }
        if let Some(sym) = scope.lookup_struct(&ty.name) {
            return Ok((CType::Record(sym.mangled.clone()), ty.is_reference));
        }
        Err(CompileError::resolution(
            format!("type '{}' not found", ty.name),
            span,
            self.file_id,
        ))
    }

    fn resolve_variable(
        &self,
        g: &VariableGet,
        scope: &Scope<'_>,
    ) -> Result<VarSym, CompileError> {
        scope.lookup_variable(&g.name).cloned().ok_or_else(|| {
            CompileError::resolution(
                format!("variable '{}' not found", g.name),
                g.span.clone(),
                self.file_id,
            )
        })
    }

    /// Register the reference wrapper for a base type the first time it is
    /// used. Heap payloads must stay reference-free so cell release can be
    /// shallow.
    fn ensure_wrapper(&mut self, base: &CType, span: Span) -> Result<String, CompileError> {
        if let CType::Record(name) = base {
            let meta = self.record_meta.get(name).expect("record metadata");
            if !meta.ref_paths.is_empty() {
                return Err(CompileError::type_error(
                    format!(
                        "cannot take references to struct '{}': it contains reference-typed fields",
                        name
                    ),
                    span,
                    self.file_id,
                ));
            }
        }
        let tag = base.wrapper_tag();
        if self.wrapper_seen.insert(tag.clone()) {
            self.wrappers.push(WrapperDecl {
                tag: tag.clone(),
                base: base.clone(),
            });
        }
        Ok(tag)
    }

    fn is_owned(&self, place: &Place) -> bool {
        self.owned.contains(&place.key())
    }

    fn mark_owned(&mut self, place: Place, block: BlockId) {
        if self.owned.insert(place.key()) {
            self.cleanup.entry(block.0).or_default().push(place);
        }
    }

    fn unmark_owned(&mut self, place: &Place) {
        self.owned.remove(&place.key());
    }

    fn misplaced(&self, command: &Command) -> CompileError {
        CompileError::internal(
            format!("{} cannot be used as a value", command.kind_name()),
            command.span(),
            self.file_id,
        )
    }
}

fn sub_place(base: &Place, path: &[String]) -> Place {
    let mut fields = base.fields.clone();
    fields.extend(path.iter().cloned());
    Place {
        var: base.var.clone(),
        fields,
        deref: base.deref,
    }
}
