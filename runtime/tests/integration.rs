use bloc::ErrorKind;
use runtime::{Heap, Report};

fn compile(source: &str) -> String {
    bloc::compile(source, 0).expect("compile failed")
}

fn compile_err(source: &str) -> ErrorKind {
    bloc::compile(source, 0)
        .expect_err("expected a compile error")
        .kind
}

fn simulate(source: &str) -> Report {
    let program = bloc::lower_source(source, 0).expect("lowering failed");
    let heap = Heap::new();
    runtime::simulate(&program, &heap).expect("simulation failed")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[test]
fn minimal_program() {
    let out = compile("{}");
    assert!(out.contains("int main(void)"), "got: {}", out);
    assert!(out.contains("/* block b0 */"), "got: {}", out);
}

#[test]
fn brackets_are_interchangeable() {
    assert_eq!(compile("{ x: int = 1 }"), compile("( x: int = 1 )"));
}

#[test]
fn end_of_input_closes_open_blocks() {
    assert_eq!(compile("{ x: int = 1"), compile("{ x: int = 1 }"));
}

#[test]
fn keyword_forms_parse() {
    let out = compile("{ var x: int = 1  set x = 2  get x }");
    assert!(out.contains("_x_at_b0 = 2;"), "got: {}", out);
}

#[test]
fn missing_block_opener_rejected() {
    assert_eq!(compile_err("x: int = 1"), ErrorKind::Syntax);
}

#[test]
fn stray_symbol_rejected() {
    assert_eq!(compile_err("{ ~ }"), ErrorKind::Syntax);
}

#[test]
fn second_decimal_point_rejected() {
    assert_eq!(compile_err("{ x: float = 2.5.1 }"), ErrorKind::Syntax);
}

#[test]
fn syntax_errors_carry_consumed_prefix() {
    let err = bloc::compile("{ x: float = 2.5.1 }", 0).expect_err("expected an error");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert!(
        err.notes.iter().any(|n| n.starts_with("after reading:")),
        "notes: {:?}",
        err.notes
    );
}

#[test]
fn struct_sigil_before_name_is_stripped() {
    let out = compile("{ struct @P { x: int }  p: P }");
    assert!(out.contains("_P_at_b0"), "got: {}", out);
}

// ---------------------------------------------------------------------------
// Scope resolution
// ---------------------------------------------------------------------------

#[test]
fn duplicate_variable_rejected() {
    assert_eq!(
        compile_err("{ x: int = 1  x: int = 2 }"),
        ErrorKind::Definition
    );
}

#[test]
fn duplicate_struct_rejected() {
    assert_eq!(
        compile_err("{ struct S { x: int }  struct S { x: int } }"),
        ErrorKind::Definition
    );
}

#[test]
fn duplicate_field_rejected() {
    assert_eq!(
        compile_err("{ struct S { x: int  x: int } }"),
        ErrorKind::Definition
    );
}

#[test]
fn unknown_type_rejected() {
    assert_eq!(compile_err("{ x: Foo = 1 }"), ErrorKind::Resolution);
}

#[test]
fn unknown_variable_in_set_rejected() {
    assert_eq!(compile_err("{ x = 1 }"), ErrorKind::Resolution);
}

#[test]
fn unknown_variable_in_get_rejected() {
    assert_eq!(compile_err("{ get x }"), ErrorKind::Resolution);
}

#[test]
fn shadowed_variable_gets_its_own_name() {
    let out = compile("{ x: int = 1 { x: int = 2  x = 3 } x = 4 }");
    assert!(out.contains("_x_at_b1 = 3;"), "got: {}", out);
    // After the inner block closes, the outer binding is written again.
    assert!(out.contains("_x_at_b0 = 4;"), "got: {}", out);
}

#[test]
fn shadowed_struct_gets_its_own_name() {
    let out = compile("{ struct S { x: int } { struct S { y: int }  v: S } }");
    assert!(out.contains("_S_at_b0"), "got: {}", out);
    assert!(out.contains("_S_at_b1"), "got: {}", out);
    assert!(out.contains("_v_at_b1 = _S_at_b1_default;"), "got: {}", out);
}

#[test]
fn sibling_blocks_do_not_share_scope() {
    assert_eq!(
        compile_err("{ { x: int = 1 } { x = 2 } }"),
        ErrorKind::Resolution
    );
}

#[test]
fn struct_field_types_resolve_through_enclosing_scope() {
    let out = compile("{ struct A { x: int }  struct B { a: A } }");
    assert!(out.contains("_A_at_b0 a;"), "got: {}", out);
}

#[test]
fn field_defaults_cannot_see_block_variables() {
    assert_eq!(
        compile_err("{ n: int = 1  struct S { x: int = n } }"),
        ErrorKind::Resolution
    );
}

// ---------------------------------------------------------------------------
// Literals and types
// ---------------------------------------------------------------------------

#[test]
fn literals_are_suffixed_by_destination_type() {
    let out = compile(
        "{ a: float = 2.5  b: double = 2.5  c: uint = 7  d: long = 7  e: ulong = 7 }",
    );
    assert!(out.contains("_a_at_b0 = 2.5f;"), "got: {}", out);
    assert!(out.contains("_b_at_b0 = 2.5;"), "got: {}", out);
    assert!(out.contains("_c_at_b0 = 7U;"), "got: {}", out);
    assert!(out.contains("_d_at_b0 = 7L;"), "got: {}", out);
    assert!(out.contains("_e_at_b0 = 7UL;"), "got: {}", out);
}

#[test]
fn integer_literal_into_float_slot_gains_fraction() {
    let out = compile("{ x: @double = alloc 1 }");
    assert!(out.contains("_alloc_double(1.0)"), "got: {}", out);
}

#[test]
fn fractional_literal_into_integer_slot_rejected() {
    assert_eq!(compile_err("{ n: int = 2.5 }"), ErrorKind::Type);
}

#[test]
fn numeric_literal_into_bool_rejected() {
    assert_eq!(compile_err("{ b: bool = 1 }"), ErrorKind::Type);
}

#[test]
fn numeric_literal_into_struct_rejected() {
    assert_eq!(
        compile_err("{ struct S { x: int }  v: S = 1 }"),
        ErrorKind::Type
    );
}

#[test]
fn primitive_without_initializer_zeroed() {
    let out = compile("{ x: int }");
    assert!(out.contains("_x_at_b0 = 0;"), "got: {}", out);
}

#[test]
fn value_copy_out_of_reference_dereferences() {
    let out = compile("{ x: @int = alloc 1  n: int  n = x }");
    assert!(out.contains("_n_at_b0 = *_x_at_b0;"), "got: {}", out);
}

#[test]
fn standalone_expressions_lower_to_statements() {
    let out = compile("{ x: int = 1  get x  2 }");
    assert!(out.contains("\n        _x_at_b0;\n"), "got: {}", out);
    assert!(out.contains("\n        2;\n"), "got: {}", out);
}

// ---------------------------------------------------------------------------
// Structs and defaults
// ---------------------------------------------------------------------------

#[test]
fn struct_lowers_to_record_and_default_instance() {
    let out = compile("{ struct int3 { x: int = 1  y: int  z: int }  v: int3 }");
    assert!(out.contains("typedef struct {"), "got: {}", out);
    assert!(out.contains("_type_int x;"), "got: {}", out);
    assert!(out.contains("} _int3_at_b0;"), "got: {}", out);
    assert!(
        out.contains("_int3_at_b0 _int3_at_b0_default = { .x = 1 };"),
        "got: {}",
        out
    );
    assert!(out.contains("_v_at_b0 = _int3_at_b0_default;"), "got: {}", out);
}

#[test]
fn anonymous_struct_names_are_stable() {
    let source = "{ v: { x: int  y: int }  w: { x: int } }";
    let first = compile(source);
    let second = compile(source);
    assert_eq!(first, second);
    assert!(first.contains("_anon_"), "got: {}", first);
}

#[test]
fn inline_struct_hoisted_to_enclosing_block() {
    let out = compile("{ v: { x: int  y: int } }");
    // The synthesized record is declared and the variable uses it.
    assert!(out.contains("_anon_"), "got: {}", out);
    assert!(out.contains("_v_at_b0 = _anon_"), "got: {}", out);
}

#[test]
fn nested_inline_structs_hoist_inner_first() {
    let out = compile("{ v: { inner: { x: int } } }");
    let inner = out.find("} _anon_").expect("first record");
    let rest = &out[inner + 1..];
    assert!(rest.contains("} _anon_"), "got: {}", out);
}

#[test]
fn struct_used_as_value_rejected() {
    assert_eq!(
        compile_err("{ hello: int = struct error { } }"),
        ErrorKind::Internal
    );
}

#[test]
fn nested_block_as_value_rejected() {
    assert_eq!(compile_err("{ x: int = { } }"), ErrorKind::Internal);
}

// ---------------------------------------------------------------------------
// Reference lifetime: generated text
// ---------------------------------------------------------------------------

#[test]
fn alloc_binding_released_at_block_exit() {
    let out = compile("{ x: @int = alloc 1 }");
    assert!(out.contains("_x_at_b0 = _alloc_int(1);"), "got: {}", out);
    assert!(out.contains("remove_ref(_x_at_b0);"), "got: {}", out);
}

#[test]
fn unassigned_reference_needs_no_cleanup() {
    let out = compile("{ x: @int }");
    assert!(out.contains("_x_at_b0 = 0;"), "got: {}", out);
    assert!(!out.contains("remove_ref(_x_at_b0)"), "got: {}", out);
}

#[test]
fn self_alias_increments_before_decrementing() {
    let out = compile("{ x: @int = alloc 1  x = x }");
    let add = out.find("add_ref(_x_at_b0)").expect("add_ref emitted");
    let remove = out.find("remove_ref(_x_at_b0)").expect("remove_ref emitted");
    assert!(add < remove, "got: {}", out);
}

#[test]
fn cleanup_follows_first_write_order() {
    let out = compile("{ y: @int  x: @int = alloc 1  y = alloc 2 }");
    let x_release = out.find("remove_ref(_x_at_b0)").expect("x released");
    let y_release = out.find("remove_ref(_y_at_b0)").expect("y released");
    assert!(x_release < y_release, "got: {}", out);
}

#[test]
fn write_through_bound_reference() {
    let out = compile("{ x: @int = alloc 1  x = 2 }");
    assert!(out.contains("*_x_at_b0 = 2;"), "got: {}", out);
}

#[test]
fn wrapper_emitted_once_per_base_type() {
    let out = compile("{ x: @int = alloc 1  y: @int = alloc 2 }");
    assert_eq!(out.matches("static _type_int *_alloc_int").count(), 1);
}

#[test]
fn wrappers_emitted_in_first_use_order() {
    let out = compile("{ a: @double = alloc 1  b: @int = alloc 2 }");
    let double_decl = out.find("_alloc_double(_type_double init)").expect("double wrapper");
    let int_decl = out.find("_alloc_int(_type_int init)").expect("int wrapper");
    assert!(double_decl < int_decl, "got: {}", out);
}

#[test]
fn alloc_payload_copies_from_variable() {
    let out = compile("{ x: int = 3  y: @int = alloc x }");
    assert!(out.contains("_y_at_b0 = _alloc_int(_x_at_b0);"), "got: {}", out);
}

#[test]
fn alloc_payload_copies_pointee() {
    let out = compile("{ x: @int = alloc 1  y: @int = alloc x }");
    assert!(out.contains("_y_at_b0 = _alloc_int(*_x_at_b0);"), "got: {}", out);
}

// ---------------------------------------------------------------------------
// Reference lifetime: illegal forms
// ---------------------------------------------------------------------------

#[test]
fn alloc_into_value_slot_rejected() {
    assert_eq!(compile_err("{ x: int = alloc 1 }"), ErrorKind::Type);
}

#[test]
fn standalone_alloc_rejected() {
    assert_eq!(compile_err("{ alloc 1 }"), ErrorKind::Type);
}

#[test]
fn nested_alloc_rejected() {
    assert_eq!(compile_err("{ x: @int = alloc alloc 1 }"), ErrorKind::Type);
}

#[test]
fn reference_initialized_from_literal_rejected() {
    assert_eq!(compile_err("{ x: @int = 1 }"), ErrorKind::Type);
}

#[test]
fn store_through_unbound_reference_rejected() {
    assert_eq!(compile_err("{ x: @int  x = 1 }"), ErrorKind::Type);
}

#[test]
fn read_through_unbound_reference_rejected() {
    assert_eq!(
        compile_err("{ x: @int  y: @int = alloc x }"),
        ErrorKind::Type
    );
}

#[test]
fn reference_to_ref_bearing_struct_rejected() {
    assert_eq!(
        compile_err("{ struct S { p: @int = alloc 1 }  x: @S }"),
        ErrorKind::Type
    );
}

// ---------------------------------------------------------------------------
// Reference lifetime: simulated balance
// ---------------------------------------------------------------------------

#[test]
fn single_allocation_balances() {
    let report = simulate("{ x: @int = alloc 1 }");
    assert_eq!(report.allocated, 1);
    assert_eq!(report.freed, 1);
    assert_eq!(report.decrements, 1);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn self_alias_balances() {
    let report = simulate("{ x: @int = alloc 1  x = x }");
    assert_eq!(report.allocated, 1);
    assert_eq!(report.increments, 1);
    assert_eq!(report.decrements, 2);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn alias_then_reassign_balances() {
    let report = simulate("{ x: @double = alloc 1  y: @double = alloc 2  y = x }");
    assert_eq!(report.allocated, 2);
    assert_eq!(report.increments, 1);
    assert_eq!(report.decrements, 3);
    assert_eq!(report.live, 0);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn unassigned_reference_allocates_nothing() {
    let report = simulate("{ x: @int }");
    assert_eq!(report.allocated, 0);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn rewrite_releases_previous_cell() {
    let report = simulate("{ x: @int = alloc 1  x = alloc 2 }");
    assert_eq!(report.allocated, 2);
    assert_eq!(report.decrements, 2);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn write_in_nested_block_released_at_declaring_block_exit() {
    let report = simulate("{ x: @int { x = alloc 1 } }");
    assert_eq!(report.allocated, 1);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn aliasing_unbound_reference_releases_old_cell() {
    let report = simulate("{ x: @int  y: @int = alloc 1  y = x }");
    assert_eq!(report.allocated, 1);
    assert_eq!(report.freed, 1);
    assert_eq!(report.increments, 0);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn struct_default_with_allocated_field_balances() {
    let report = simulate("{ struct S { p: @int = alloc 1 } }");
    assert_eq!(report.allocated, 1);
    assert_eq!(report.decrements, 1);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn struct_field_aliasing_sibling_balances() {
    let report = simulate("{ struct S { a: @int = alloc 1  b: @int = a } }");
    assert_eq!(report.allocated, 1);
    assert_eq!(report.increments, 1);
    assert_eq!(report.decrements, 2);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn struct_copies_increment_reference_fields() {
    let report = simulate("{ struct S { p: @int = alloc 1 }  a: S  b: S  b = a }");
    assert_eq!(report.allocated, 1);
    // Default copy into a, default copy into b, then b = a.
    assert_eq!(report.increments, 3);
    assert_eq!(report.decrements, 4);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn struct_self_copy_balances() {
    let report = simulate("{ struct S { p: @int = alloc 1 }  a: S  a = a }");
    assert_eq!(report.allocated, 1);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn write_through_reference_has_no_count_effect() {
    let report = simulate("{ x: @int = alloc 1  x = 2  n: int  n = x }");
    assert_eq!(report.allocated, 1);
    assert_eq!(report.increments, 0);
    assert_eq!(report.decrements, 1);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn shadowed_references_release_independently() {
    let report = simulate("{ x: @int = alloc 1 { x: @int = alloc 2 } }");
    assert_eq!(report.allocated, 2);
    assert_eq!(report.decrements, 2);
    assert!(report.balanced(), "report: {:?}", report);
}

#[test]
fn mixed_program_balances() {
    let report = simulate(
        "{
            struct point { x: int = 1  y: int = 2 }
            struct cell { value: @double = alloc 0 }
            p: point
            q: point = p
            a: @double = alloc 1.5
            b: @double = alloc 2.5
            {
                c: @double = alloc 3.5
                b = c
            }
            b = b
            a = 4.5
        }",
    );
    assert_eq!(report.live, 0);
    assert_eq!(report.over_releases, 0);
    assert!(report.balanced(), "report: {:?}", report);
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

#[test]
fn heap_counts_follow_cell_lifecycle() {
    let heap = Heap::new();
    let cell = heap.alloc(8);
    unsafe {
        heap.add_ref(cell);
        heap.remove_ref(cell);
        heap.remove_ref(cell);
    }
    assert_eq!(heap.allocated(), 1);
    assert_eq!(heap.freed(), 1);
    assert_eq!(heap.live(), 0);
    assert_eq!(heap.increments(), 1);
    assert_eq!(heap.decrements(), 2);
    assert_eq!(heap.over_releases(), 0);
}

#[test]
fn alloc_returns_writable_payload() {
    let heap = Heap::new();
    let cell = heap.alloc(size_of::<u64>());
    unsafe {
        (cell as *mut u64).write(0xDEAD_BEEF);
        assert_eq!((cell as *mut u64).read(), 0xDEAD_BEEF);
        heap.remove_ref(cell);
    }
    assert_eq!(heap.live(), 0);
}
