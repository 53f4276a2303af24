//! Executes a lowered program's reference effects against an instrumented
//! [`Heap`], so tests can assert that every cell's count reaches zero
//! exactly once. The simulator mirrors the generated program's pointer
//! state: a slot per reference-typed binding (or reference field path),
//! each holding the payload address of the cell it currently references.
//!
//! Shadow counts are kept per live cell so a broken effect schedule is
//! reported as an error instead of touching freed memory.

use std::collections::HashMap;

use bloc::program::{CType, Instr, LoweredBlock, Place, Program, Value};

use crate::error::RuntimeError;
use crate::heap::Heap;

const POINTER_SIZE: usize = 8;

/// Totals observed by the instrumented heap over one simulation.
#[derive(Debug, Clone, Copy)]
pub struct Report {
    pub allocated: usize,
    pub freed: usize,
    pub live: usize,
    pub increments: usize,
    pub decrements: usize,
    pub over_releases: usize,
}

impl Report {
    /// The balance invariant: one implicit increment per allocation plus
    /// the explicit increments must equal the explicit decrements, with
    /// nothing live and nothing over-released.
    pub fn balanced(&self) -> bool {
        self.live == 0
            && self.over_releases == 0
            && self.allocated + self.increments == self.decrements
    }
}

pub fn simulate(program: &Program, heap: &Heap) -> Result<Report, RuntimeError> {
    let mut simulator = Simulator::new(program, heap);
    simulator.run_block(&program.root)?;
    Ok(Report {
        allocated: heap.allocated(),
        freed: heap.freed(),
        live: heap.live(),
        increments: heap.increments(),
        decrements: heap.decrements(),
        over_releases: heap.over_releases(),
    })
}

struct RecordInfo {
    fields: Vec<(String, CType, bool)>,
    ref_paths: Vec<Vec<String>>,
    size: usize,
}

enum VarKind {
    Reference,
    Value(CType),
}

struct Simulator<'a> {
    heap: &'a Heap,
    records: HashMap<String, RecordInfo>,
    wrapper_sizes: HashMap<String, usize>,
    var_kinds: HashMap<String, VarKind>,
    /// Slot key -> payload address of the held cell; 0 is null.
    slots: HashMap<String, usize>,
    /// Shadow counts for live cells.
    cells: HashMap<usize, u32>,
}

impl<'a> Simulator<'a> {
    fn new(program: &Program, heap: &'a Heap) -> Self {
        // Records are declared before use, so one pass resolves sizes and
        // nested reference paths.
        let mut records: HashMap<String, RecordInfo> = HashMap::new();
        for decl in &program.records {
            let mut size = 0;
            let mut ref_paths = Vec::new();
            let mut fields = Vec::new();
            for field in &decl.fields {
                if field.is_reference {
                    size += POINTER_SIZE;
                    ref_paths.push(vec![field.name.clone()]);
                } else {
                    match &field.ctype {
                        CType::Prim(prim) => size += prim.size(),
                        CType::Record(inner) => {
                            if let Some(info) = records.get(inner) {
                                size += info.size;
                                for path in &info.ref_paths {
                                    let mut full = vec![field.name.clone()];
                                    full.extend(path.iter().cloned());
                                    ref_paths.push(full);
                                }
                            }
                        }
                    }
                }
                fields.push((field.name.clone(), field.ctype.clone(), field.is_reference));
            }
            records.insert(
                decl.name.clone(),
                RecordInfo {
                    fields,
                    ref_paths,
                    size,
                },
            );
        }

        let mut wrapper_sizes = HashMap::new();
        for wrapper in &program.wrappers {
            let size = match &wrapper.base {
                CType::Prim(prim) => prim.size(),
                CType::Record(name) => records.get(name).map(|r| r.size).unwrap_or(0),
            };
            wrapper_sizes.insert(wrapper.tag.clone(), size);
        }

        Simulator {
            heap,
            records,
            wrapper_sizes,
            var_kinds: HashMap::new(),
            slots: HashMap::new(),
            cells: HashMap::new(),
        }
    }

    fn run_block(&mut self, block: &LoweredBlock) -> Result<(), RuntimeError> {
        for instr in &block.instrs {
            self.step(instr)?;
        }
        for place in &block.exit_releases {
            self.release(place)?;
        }
        Ok(())
    }

    fn step(&mut self, instr: &Instr) -> Result<(), RuntimeError> {
        match instr {
            Instr::Declare {
                name,
                ctype,
                is_reference,
            } => {
                if *is_reference {
                    self.slots.insert(name.clone(), 0);
                    self.var_kinds.insert(name.clone(), VarKind::Reference);
                } else {
                    self.var_kinds
                        .insert(name.clone(), VarKind::Value(ctype.clone()));
                    if let CType::Record(record) = ctype {
                        self.register_record_slots(name, record);
                    }
                }
                Ok(())
            }
            Instr::DefaultInstance { record, name, .. } => {
                self.var_kinds
                    .insert(name.clone(), VarKind::Value(CType::Record(record.clone())));
                self.register_record_slots(name, record);
                Ok(())
            }
            Instr::Store { dst, value } => self.store(dst, value),
            Instr::AllocStore { dst, wrapper, .. } => {
                let size = self
                    .wrapper_sizes
                    .get(wrapper)
                    .copied()
                    .unwrap_or(POINTER_SIZE);
                let key = dst.key();
                if !self.slots.contains_key(&key) {
                    return Err(RuntimeError::UnknownSlot(dst.render()));
                }
                let cell = self.heap.alloc(size) as usize;
                self.cells.insert(cell, 1);
                self.slots.insert(key, cell);
                Ok(())
            }
            Instr::Retain { place } => self.retain(place),
            Instr::Release { place } => self.release(place),
            Instr::Eval { .. } => Ok(()),
            Instr::Nested(block) => self.run_block(block),
        }
    }

    fn register_record_slots(&mut self, name: &str, record: &str) {
        let paths = self
            .records
            .get(record)
            .map(|info| info.ref_paths.clone())
            .unwrap_or_default();
        for path in paths {
            self.slots.insert(join_key(name, &path), 0);
        }
    }

    fn store(&mut self, dst: &Place, value: &Value) -> Result<(), RuntimeError> {
        if dst.deref {
            // A write into a cell's payload; payloads are reference-free.
            return Ok(());
        }
        let key = dst.key();
        if self.slots.contains_key(&key) {
            let cell = match value {
                Value::Zero => 0,
                Value::Place(src) if !src.deref => self
                    .slots
                    .get(&src.key())
                    .copied()
                    .ok_or_else(|| RuntimeError::UnknownSlot(src.render()))?,
                _ => return Err(RuntimeError::InvalidStore(dst.render())),
            };
            self.slots.insert(key, cell);
            return Ok(());
        }
        if let Some(record) = self.record_at(dst) {
            let paths = self
                .records
                .get(&record)
                .map(|info| info.ref_paths.clone())
                .unwrap_or_default();
            if paths.is_empty() {
                return Ok(());
            }
            match value {
                Value::Zero => {
                    for path in paths {
                        self.slots.insert(join_key(&key, &path), 0);
                    }
                }
                Value::Place(src) if !src.deref => {
                    let src_key = src.key();
                    for path in paths {
                        let cell = self
                            .slots
                            .get(&join_key(&src_key, &path))
                            .copied()
                            .ok_or_else(|| RuntimeError::UnknownSlot(src.render()))?;
                        self.slots.insert(join_key(&key, &path), cell);
                    }
                }
                _ => return Err(RuntimeError::InvalidStore(dst.render())),
            }
        }
        Ok(())
    }

    /// The record type stored at a place, when the place names a whole
    /// record-typed variable or value field (not a reference slot).
    fn record_at(&self, place: &Place) -> Option<String> {
        let kind = self.var_kinds.get(&place.var)?;
        let mut ctype = match kind {
            VarKind::Value(ctype) => ctype.clone(),
            VarKind::Reference => return None,
        };
        for field in &place.fields {
            let CType::Record(record) = ctype else {
                return None;
            };
            let info = self.records.get(&record)?;
            let (_, field_type, is_reference) =
                info.fields.iter().find(|(name, _, _)| name == field)?;
            if *is_reference {
                return None;
            }
            ctype = field_type.clone();
        }
        match ctype {
            CType::Record(record) => Some(record),
            _ => None,
        }
    }

    fn cell_at(&self, place: &Place) -> Result<usize, RuntimeError> {
        self.slots
            .get(&place.key())
            .copied()
            .ok_or_else(|| RuntimeError::UnknownSlot(place.render()))
    }

    fn retain(&mut self, place: &Place) -> Result<(), RuntimeError> {
        let cell = self.cell_at(place)?;
        if cell == 0 {
            return Err(RuntimeError::NullRetain(place.render()));
        }
        match self.cells.get_mut(&cell) {
            Some(count) => *count += 1,
            None => return Err(RuntimeError::DeadCell(place.render())),
        }
        unsafe { self.heap.add_ref(cell as *mut u8) };
        Ok(())
    }

    fn release(&mut self, place: &Place) -> Result<(), RuntimeError> {
        let cell = self.cell_at(place)?;
        if cell == 0 {
            return Err(RuntimeError::NullRelease(place.render()));
        }
        match self.cells.get_mut(&cell) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.cells.remove(&cell);
                }
            }
            None => return Err(RuntimeError::DeadCell(place.render())),
        }
        unsafe { self.heap.remove_ref(cell as *mut u8) };
        Ok(())
    }
}

fn join_key(base: &str, path: &[String]) -> String {
    format!("{}.{}", base, path.join("."))
}
