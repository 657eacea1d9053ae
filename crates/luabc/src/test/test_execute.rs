// Frame executor: spec scenarios and opcode behaviors, driven by
// hand-assembled prototypes
use super::chunk_asm::{ImageOptions, assemble_image, chunk, subchunk};
use crate::lua_value::LuaValue;
use crate::lua_vm::opcode::instruction::{iabc, iabx, iasbx};
use crate::lua_vm::{LuaError, LuaVM, OpCode, VmOptions};

fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new(VmOptions::default());
    vm.open_libs();
    vm
}

fn k(i: u32) -> u32 {
    256 + i
}

#[test]
fn test_arith_concat_len() {
    // return 1+2, "a".."b", #"hi"
    let main = chunk(
        0,
        true,
        4,
        vec![
            iabc(OpCode::Add, 0, k(0), k(1)),
            iabx(OpCode::LoadK, 1, 2),
            iabx(OpCode::LoadK, 2, 3),
            iabc(OpCode::Concat, 1, 1, 2),
            iabx(OpCode::LoadK, 2, 4),
            iabc(OpCode::Len, 2, 2, 0),
            iabc(OpCode::Return, 0, 4, 0),
        ],
        vec![
            LuaValue::Number(1.0),
            LuaValue::Number(2.0),
            LuaValue::str("a"),
            LuaValue::str("b"),
            LuaValue::str("hi"),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].raw_eq(&LuaValue::Number(3.0)));
    assert!(results[1].raw_eq(&LuaValue::str("ab")));
    assert!(results[2].raw_eq(&LuaValue::Number(2.0)));
}

#[test]
fn test_table_constructor_len_index() {
    // local t = {10,20,30}; return #t, t[2]
    let main = chunk(
        0,
        true,
        4,
        vec![
            iabc(OpCode::NewTable, 0, 3, 0),
            iabx(OpCode::LoadK, 1, 0),
            iabx(OpCode::LoadK, 2, 1),
            iabx(OpCode::LoadK, 3, 2),
            iabc(OpCode::SetList, 0, 3, 1),
            iabc(OpCode::Len, 1, 0, 0),
            iabc(OpCode::GetTable, 2, 0, k(3)),
            iabc(OpCode::Return, 1, 3, 0),
        ],
        vec![
            LuaValue::Number(10.0),
            LuaValue::Number(20.0),
            LuaValue::Number(30.0),
            LuaValue::Number(2.0),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].raw_eq(&LuaValue::Number(3.0)));
    assert!(results[1].raw_eq(&LuaValue::Number(20.0)));
}

#[test]
fn test_numeric_for_loop() {
    // local s = 0; for i = 1, 10 do s = s + i end; return s
    let main = chunk(
        0,
        true,
        5,
        vec![
            iabx(OpCode::LoadK, 0, 0),
            iabx(OpCode::LoadK, 1, 1),
            iabx(OpCode::LoadK, 2, 2),
            iabx(OpCode::LoadK, 3, 1),
            iasbx(OpCode::ForPrep, 1, 1),
            iabc(OpCode::Add, 0, 0, 4),
            iasbx(OpCode::ForLoop, 1, -2),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![
            LuaValue::Number(0.0),
            LuaValue::Number(1.0),
            LuaValue::Number(10.0),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].raw_eq(&LuaValue::Number(55.0)));
}

#[test]
fn test_for_loop_negative_step() {
    // local s = 0; for i = 3, 1, -1 do s = s + i end; return s
    let main = chunk(
        0,
        true,
        5,
        vec![
            iabx(OpCode::LoadK, 0, 0),
            iabx(OpCode::LoadK, 1, 1),
            iabx(OpCode::LoadK, 2, 2),
            iabx(OpCode::LoadK, 3, 3),
            iasbx(OpCode::ForPrep, 1, 1),
            iabc(OpCode::Add, 0, 0, 4),
            iasbx(OpCode::ForLoop, 1, -2),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![
            LuaValue::Number(0.0),
            LuaValue::Number(3.0),
            LuaValue::Number(1.0),
            LuaValue::Number(-1.0),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(6.0)));
}

#[test]
fn test_for_loop_non_numeric_control() {
    let main = chunk(
        0,
        true,
        5,
        vec![
            iabx(OpCode::LoadK, 1, 0),
            iabx(OpCode::LoadK, 2, 1),
            iabx(OpCode::LoadK, 3, 1),
            iasbx(OpCode::ForPrep, 1, 0),
            iabc(OpCode::Return, 0, 1, 0),
        ],
        vec![LuaValue::str("x"), LuaValue::Number(1.0)],
        Vec::new(),
    );
    let mut vm = new_vm();
    assert_eq!(vm.execute(main), Err(LuaError::RuntimeError));
    assert!(
        vm.error_message().contains("'for' initial value must be a number"),
        "got: {}",
        vm.error_message()
    );
}

#[test]
fn test_load_bool_skip() {
    // LOADBOOL with C=1 skips the following instruction
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabc(OpCode::LoadBool, 0, 1, 1),
            iabx(OpCode::LoadK, 0, 0),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![LuaValue::str("clobbered")],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Boolean(true)));
}

#[test]
fn test_load_nil_and_move() {
    let main = chunk(
        0,
        true,
        4,
        vec![
            iabx(OpCode::LoadK, 0, 0),
            iabx(OpCode::LoadK, 1, 0),
            iabc(OpCode::LoadNil, 0, 1, 0),
            iabc(OpCode::Move, 2, 0, 0),
            iabc(OpCode::Return, 1, 3, 0),
        ],
        vec![LuaValue::Number(5.0)],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].is_nil());
    assert!(results[1].is_nil());
}

#[test]
fn test_comparison_branches() {
    // if 1 < 2 then return "yes" else return "no" end
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabc(OpCode::Lt, 0, k(0), k(1)),
            iasbx(OpCode::Jmp, 0, 2),
            iabx(OpCode::LoadK, 0, 2),
            iabc(OpCode::Return, 0, 2, 0),
            iabx(OpCode::LoadK, 0, 3),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![
            LuaValue::Number(1.0),
            LuaValue::Number(2.0),
            LuaValue::str("yes"),
            LuaValue::str("no"),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::str("yes")));
}

#[test]
fn test_string_order_comparison() {
    // return "apple" < "banana", "b" <= "b"
    let main = chunk(
        0,
        true,
        3,
        vec![
            iabc(OpCode::Lt, 1, k(0), k(1)),
            iasbx(OpCode::Jmp, 0, 1),
            iabc(OpCode::LoadBool, 0, 0, 1),
            iabc(OpCode::LoadBool, 0, 1, 0),
            iabc(OpCode::Le, 1, k(2), k(2)),
            iasbx(OpCode::Jmp, 0, 1),
            iabc(OpCode::LoadBool, 1, 0, 1),
            iabc(OpCode::LoadBool, 1, 1, 0),
            iabc(OpCode::Return, 0, 3, 0),
        ],
        vec![
            LuaValue::str("apple"),
            LuaValue::str("banana"),
            LuaValue::str("b"),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Boolean(true)));
    assert!(results[1].raw_eq(&LuaValue::Boolean(true)));
}

#[test]
fn test_incompatible_comparison_fails() {
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabc(OpCode::Lt, 0, k(0), k(1)),
            iasbx(OpCode::Jmp, 0, 0),
            iabc(OpCode::Return, 0, 1, 0),
        ],
        vec![LuaValue::Number(1.0), LuaValue::str("x")],
        Vec::new(),
    );
    let mut vm = new_vm();
    assert_eq!(vm.execute(main), Err(LuaError::RuntimeError));
    assert!(
        vm.error_message().contains("attempt to compare number with string"),
        "got: {}",
        vm.error_message()
    );
}

#[test]
fn test_test_and_testset() {
    // TESTSET copies when the predicate holds
    let main = chunk(
        0,
        true,
        3,
        vec![
            iabx(OpCode::LoadK, 1, 0),
            iabc(OpCode::TestSet, 0, 1, 1),
            iasbx(OpCode::Jmp, 0, 0),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![LuaValue::str("picked")],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::str("picked")));

    // and skips the jump when it does not
    let main = chunk(
        0,
        true,
        3,
        vec![
            iabc(OpCode::LoadBool, 1, 0, 0),
            iabc(OpCode::TestSet, 0, 1, 1),
            iasbx(OpCode::Jmp, 0, 1),
            iabx(OpCode::LoadK, 0, 0),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![LuaValue::str("fallthrough")],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::str("fallthrough")));
}

#[test]
fn test_vararg_propagation() {
    // local f = function(...) return ... end; return f(7, 8, 9)
    let varfn = chunk(
        0,
        true,
        2,
        vec![iabc(OpCode::Vararg, 0, 0, 0), iabc(OpCode::Return, 0, 0, 0)],
        Vec::new(),
        Vec::new(),
    );
    let main = chunk(
        0,
        true,
        5,
        vec![
            iabx(OpCode::Closure, 0, 0),
            iabx(OpCode::LoadK, 1, 0),
            iabx(OpCode::LoadK, 2, 1),
            iabx(OpCode::LoadK, 3, 2),
            iabc(OpCode::Call, 0, 4, 0),
            iabc(OpCode::Return, 0, 0, 0),
        ],
        vec![
            LuaValue::Number(7.0),
            LuaValue::Number(8.0),
            LuaValue::Number(9.0),
        ],
        vec![varfn],
    );
    let results = new_vm().execute(main).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].raw_eq(&LuaValue::Number(7.0)));
    assert!(results[2].raw_eq(&LuaValue::Number(9.0)));
}

#[test]
fn test_vararg_fixed_count_pads_nil() {
    // function(a, ...) local x, y = ... ; return a, x, y end called with (1, 2)
    let varfn = chunk(
        1,
        true,
        4,
        vec![
            iabc(OpCode::Vararg, 1, 3, 0),
            iabc(OpCode::Return, 0, 4, 0),
        ],
        Vec::new(),
        Vec::new(),
    );
    let main = chunk(
        0,
        true,
        4,
        vec![
            iabx(OpCode::Closure, 0, 0),
            iabx(OpCode::LoadK, 1, 0),
            iabx(OpCode::LoadK, 2, 1),
            iabc(OpCode::Call, 0, 3, 0),
            iabc(OpCode::Return, 0, 0, 0),
        ],
        vec![LuaValue::Number(1.0), LuaValue::Number(2.0)],
        vec![varfn],
    );
    let results = new_vm().execute(main).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].raw_eq(&LuaValue::Number(1.0)));
    assert!(results[1].raw_eq(&LuaValue::Number(2.0)));
    assert!(results[2].is_nil());
}

#[test]
fn test_self_method_call() {
    // local t = {}; t.m = function(self, x) return x + 1 end; return t:m(41)
    let method = chunk(
        2,
        false,
        3,
        vec![iabc(OpCode::Add, 2, 1, k(0)), iabc(OpCode::Return, 2, 2, 0)],
        vec![LuaValue::Number(1.0)],
        Vec::new(),
    );
    let main = chunk(
        0,
        true,
        4,
        vec![
            iabc(OpCode::NewTable, 0, 0, 0),
            iabx(OpCode::Closure, 1, 0),
            iabc(OpCode::SetTable, 0, k(0), 1),
            iabc(OpCode::Self_, 1, 0, k(0)),
            iabx(OpCode::LoadK, 3, 1),
            iabc(OpCode::Call, 1, 3, 2),
            iabc(OpCode::Return, 1, 2, 0),
        ],
        vec![LuaValue::str("m"), LuaValue::Number(41.0)],
        vec![method],
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(42.0)));
}

#[test]
fn test_setlist_extended_block() {
    // SETLIST with C = 0 takes the block index from the next word
    let main = chunk(
        0,
        true,
        3,
        vec![
            iabc(OpCode::NewTable, 0, 0, 0),
            iabx(OpCode::LoadK, 1, 0),
            iabc(OpCode::SetList, 0, 1, 0),
            2, // raw block index
            iabc(OpCode::GetTable, 1, 0, k(1)),
            iabc(OpCode::Return, 1, 2, 0),
        ],
        vec![LuaValue::Number(7.0), LuaValue::Number(51.0)],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    // (2-1)*50 + 1 = 51
    assert!(results[0].raw_eq(&LuaValue::Number(7.0)));
}

#[test]
fn test_setlist_from_top() {
    // t = {f()} where f returns a variable tuple: SETLIST B = 0 uses top
    let producer = chunk(
        0,
        false,
        3,
        vec![
            iabx(OpCode::LoadK, 0, 0),
            iabx(OpCode::LoadK, 1, 1),
            iabc(OpCode::Return, 0, 3, 0),
        ],
        vec![LuaValue::str("x"), LuaValue::str("y")],
        Vec::new(),
    );
    let main = chunk(
        0,
        true,
        4,
        vec![
            iabc(OpCode::NewTable, 0, 0, 0),
            iabx(OpCode::Closure, 1, 0),
            iabc(OpCode::Call, 1, 1, 0),
            iabc(OpCode::SetList, 0, 0, 1),
            iabc(OpCode::Len, 1, 0, 0),
            iabc(OpCode::Return, 1, 2, 0),
        ],
        Vec::new(),
        vec![producer],
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(2.0)));
}

#[test]
fn test_generic_for_with_pairs() {
    // local t = {"a","b"}; local s = 0; for k in pairs(t) do s = s + k end
    let main = chunk(
        0,
        true,
        8,
        vec![
            iabc(OpCode::NewTable, 0, 2, 0),
            iabx(OpCode::LoadK, 1, 0),
            iabx(OpCode::LoadK, 2, 1),
            iabc(OpCode::SetList, 0, 2, 1),
            iabx(OpCode::LoadK, 6, 3),
            iabx(OpCode::GetGlobal, 1, 2),
            iabc(OpCode::Move, 2, 0, 0),
            iabc(OpCode::Call, 1, 2, 4),
            iasbx(OpCode::Jmp, 0, 1),
            iabc(OpCode::Add, 6, 6, 4),
            iabc(OpCode::TForLoop, 1, 0, 2),
            iasbx(OpCode::Jmp, 0, -3),
            iabc(OpCode::Return, 6, 2, 0),
        ],
        vec![
            LuaValue::str("a"),
            LuaValue::str("b"),
            LuaValue::str("pairs"),
            LuaValue::Number(0.0),
        ],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(3.0)));
}

#[test]
fn test_tail_call_constant_depth() {
    // local function loop(n) if n == 0 then return "done" end
    //   return loop(n - 1) end
    // return loop(100000)
    let loop_fn = subchunk(
        1,
        1,
        4,
        vec![
            iabc(OpCode::Eq, 0, 0, k(0)),
            iasbx(OpCode::Jmp, 0, 2),
            iabx(OpCode::LoadK, 1, 1),
            iabc(OpCode::Return, 1, 2, 0),
            iabc(OpCode::GetUpval, 1, 0, 0),
            iabc(OpCode::Sub, 2, 0, k(2)),
            iabc(OpCode::TailCall, 1, 2, 0),
            iabc(OpCode::Return, 1, 0, 0),
        ],
        vec![
            LuaValue::Number(0.0),
            LuaValue::str("done"),
            LuaValue::Number(1.0),
        ],
        Vec::new(),
    );
    let main = chunk(
        0,
        true,
        3,
        vec![
            iabx(OpCode::Closure, 0, 0),
            iabc(OpCode::Move, 0, 0, 0), // capture binding for the upvalue
            iabc(OpCode::Move, 1, 0, 0),
            iabx(OpCode::LoadK, 2, 0),
            iabc(OpCode::Call, 1, 2, 2),
            iabc(OpCode::Return, 1, 2, 0),
        ],
        vec![LuaValue::Number(100000.0)],
        vec![loop_fn],
    );
    // 100k recursive tail calls complete inside a 200-frame budget
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::str("done")));
}

#[test]
fn test_deep_recursion_overflows() {
    // the same shape without the tail call exhausts the frame budget
    let rec_fn = subchunk(
        1,
        1,
        4,
        vec![
            iabc(OpCode::Eq, 0, 0, k(0)),
            iasbx(OpCode::Jmp, 0, 2),
            iabx(OpCode::LoadK, 1, 0),
            iabc(OpCode::Return, 1, 2, 0),
            iabc(OpCode::GetUpval, 1, 0, 0),
            iabc(OpCode::Sub, 2, 0, k(1)),
            iabc(OpCode::Call, 1, 2, 2),
            iabc(OpCode::Return, 1, 2, 0),
        ],
        vec![LuaValue::Number(0.0), LuaValue::Number(1.0)],
        Vec::new(),
    );
    let main = chunk(
        0,
        true,
        3,
        vec![
            iabx(OpCode::Closure, 0, 0),
            iabc(OpCode::Move, 0, 0, 0),
            iabc(OpCode::Move, 1, 0, 0),
            iabx(OpCode::LoadK, 2, 0),
            iabc(OpCode::Call, 1, 2, 2),
            iabc(OpCode::Return, 1, 2, 0),
        ],
        vec![LuaValue::Number(1000.0)],
        vec![rec_fn],
    );
    let mut vm = new_vm();
    assert_eq!(vm.execute(main), Err(LuaError::StackOverflow));
}

#[test]
fn test_call_of_non_function_fails() {
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabx(OpCode::LoadK, 0, 0),
            iabc(OpCode::Call, 0, 1, 1),
            iabc(OpCode::Return, 0, 1, 0),
        ],
        vec![LuaValue::Number(5.0)],
        Vec::new(),
    );
    let mut vm = new_vm();
    assert_eq!(vm.execute(main), Err(LuaError::RuntimeError));
    assert!(
        vm.error_message().contains("attempt to call a number value"),
        "got: {}",
        vm.error_message()
    );
}

#[test]
fn test_arith_on_string_numbers() {
    // "21" * "2" coerces both operands
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabc(OpCode::Mul, 0, k(0), k(1)),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![LuaValue::str("21"), LuaValue::str("2")],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(42.0)));
}

#[test]
fn test_arith_type_error_position() {
    let mut proto = chunk(
        0,
        true,
        2,
        vec![
            iabx(OpCode::LoadK, 0, 0),
            iabc(OpCode::Add, 0, 0, k(1)),
            iabc(OpCode::Return, 0, 1, 0),
        ],
        vec![LuaValue::Boolean(true), LuaValue::Number(1.0)],
        Vec::new(),
    );
    {
        let p = std::rc::Rc::get_mut(&mut proto).unwrap();
        p.line_info = vec![1, 2, 3];
    }
    let mut vm = new_vm();
    assert_eq!(vm.execute(proto), Err(LuaError::RuntimeError));
    assert_eq!(
        vm.error_message(),
        "test:2: attempt to perform arithmetic on a boolean value"
    );
}

#[test]
fn test_division_by_zero_is_infinite() {
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabc(OpCode::Div, 0, k(0), k(1)),
            iabc(OpCode::Unm, 1, 0, 0),
            iabc(OpCode::Return, 0, 3, 0),
        ],
        vec![LuaValue::Number(1.0), LuaValue::Number(0.0)],
        Vec::new(),
    );
    let results = new_vm().execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(f64::INFINITY)));
    assert!(results[1].raw_eq(&LuaValue::Number(f64::NEG_INFINITY)));
}

#[test]
fn test_execute_from_image() {
    // end to end: assemble an image, load it, run it
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabc(OpCode::Add, 0, k(0), k(1)),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![LuaValue::Number(20.0), LuaValue::Number(22.0)],
        Vec::new(),
    );
    let image = assemble_image(&main, &ImageOptions::default());
    let results = crate::execute(&image).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(42.0)));
}

#[test]
fn test_globals_access() {
    // answer = 41; return answer + 1
    let main = chunk(
        0,
        true,
        2,
        vec![
            iabx(OpCode::LoadK, 0, 1),
            iabx(OpCode::SetGlobal, 0, 0),
            iabx(OpCode::GetGlobal, 0, 0),
            iabc(OpCode::Add, 0, 0, k(2)),
            iabc(OpCode::Return, 0, 2, 0),
        ],
        vec![
            LuaValue::str("answer"),
            LuaValue::Number(41.0),
            LuaValue::Number(1.0),
        ],
        Vec::new(),
    );
    let mut vm = new_vm();
    let results = vm.execute(main).unwrap();
    assert!(results[0].raw_eq(&LuaValue::Number(42.0)));
    assert!(vm.get_global("answer").raw_eq(&LuaValue::Number(41.0)));
}

#[test]
fn test_unknown_opcode_fails() {
    let main = chunk(0, true, 2, vec![63], Vec::new(), Vec::new());
    let mut vm = new_vm();
    assert_eq!(vm.execute(main), Err(LuaError::RuntimeError));
    assert!(
        vm.error_message().contains("unknown opcode"),
        "got: {}",
        vm.error_message()
    );
}
