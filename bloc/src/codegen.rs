//! C text emission. Everything interesting was decided during lowering;
//! this walk just renders it: prelude, record typedefs and reference
//! wrappers in first-use order, then one executable unit with a marker
//! and a cleanup tail per block.

use crate::program::{Instr, LoweredBlock, Program, RecordDecl, WrapperDecl};
use crate::types::ALL_PRIMITIVES;

pub fn emit(program: &Program) -> String {
    let mut out = String::new();
    emit_prelude(&mut out);
    for record in &program.records {
        emit_record(&mut out, record);
    }
    for wrapper in &program.wrappers {
        emit_wrapper(&mut out, wrapper);
    }
    out.push_str("int main(void)\n{\n");
    emit_block(&mut out, &program.root, 1);
    out.push_str("    return 0;\n}\n");
    out
}

fn emit_prelude(out: &mut String) {
    out.push_str("#include <stdbool.h>\n");
    out.push_str("#include <stddef.h>\n");
    out.push_str("#include <stdint.h>\n");
    out.push('\n');
    out.push_str("extern void *alloc(size_t size);\n");
    out.push_str("extern void *add_ref(void *ptr);\n");
    out.push_str("extern void remove_ref(void *ptr);\n");
    out.push('\n');
    for prim in ALL_PRIMITIVES {
        out.push_str(&format!("typedef {} {};\n", prim.c_alias(), prim.c_name()));
    }
    out.push('\n');
}

fn emit_record(out: &mut String, record: &RecordDecl) {
    out.push_str("typedef struct {\n");
    for field in &record.fields {
        if field.is_reference {
            out.push_str(&format!("    {} *{};\n", field.ctype.c_name(), field.name));
        } else {
            out.push_str(&format!("    {} {};\n", field.ctype.c_name(), field.name));
        }
    }
    out.push_str(&format!("}} {};\n\n", record.name));
}

fn emit_wrapper(out: &mut String, wrapper: &WrapperDecl) {
    let base = wrapper.base.c_name();
    let func = wrapper.func_name();
    out.push_str(&format!("static {} *{}({} init)\n", base, func, base));
    out.push_str("{\n");
    out.push_str(&format!(
        "    {} *ptr = ({} *)alloc(sizeof({}));\n",
        base, base, base
    ));
    out.push_str("    *ptr = init;\n");
    out.push_str("    return ptr;\n");
    out.push_str("}\n\n");
}

fn emit_block(out: &mut String, block: &LoweredBlock, depth: usize) {
    let outer = "    ".repeat(depth);
    let inner = "    ".repeat(depth + 1);
    out.push_str(&format!("{}{{\n", outer));
    out.push_str(&format!("{}/* block {} */\n", inner, block.id));
    for instr in &block.instrs {
        emit_instr(out, instr, depth + 1);
    }
    for place in &block.exit_releases {
        out.push_str(&format!("{}remove_ref({});\n", inner, place.render()));
    }
    out.push_str(&format!("{}}}\n", outer));
}

fn emit_instr(out: &mut String, instr: &Instr, depth: usize) {
    let pad = "    ".repeat(depth);
    match instr {
        Instr::Declare {
            name,
            ctype,
            is_reference,
        } => {
            if *is_reference {
                out.push_str(&format!("{}{} *{};\n", pad, ctype.c_name(), name));
            } else {
                out.push_str(&format!("{}{} {};\n", pad, ctype.c_name(), name));
            }
        }
        Instr::Store { dst, value } => {
            out.push_str(&format!("{}{} = {};\n", pad, dst.render(), value.render()));
        }
        Instr::AllocStore {
            dst,
            wrapper,
            value,
        } => {
            out.push_str(&format!(
                "{}{} = _alloc_{}({});\n",
                pad,
                dst.render(),
                wrapper,
                value.render()
            ));
        }
        Instr::Retain { place } => {
            out.push_str(&format!("{}add_ref({});\n", pad, place.render()));
        }
        Instr::Release { place } => {
            out.push_str(&format!("{}remove_ref({});\n", pad, place.render()));
        }
        Instr::Eval { value } => {
            out.push_str(&format!("{}{};\n", pad, value.render()));
        }
        Instr::DefaultInstance {
            record,
            name,
            fields,
        } => {
            if fields.is_empty() {
                out.push_str(&format!("{}{} {} = {{0}};\n", pad, record, name));
            } else {
                let inits: Vec<String> = fields
                    .iter()
                    .map(|(field, value)| format!(".{} = {}", field, value.render()))
                    .collect();
                out.push_str(&format!(
                    "{}{} {} = {{ {} }};\n",
                    pad,
                    record,
                    name,
                    inits.join(", ")
                ));
            }
        }
        Instr::Nested(block) => emit_block(out, block, depth),
    }
}
