/*----------------------------------------------------------------------
  VM execution engine

  Single-loop, stack-ripped dispatcher: the 'startfunc loop reloads the
  top frame's context and the inner loop dispatches its instructions.
  Lua-to-Lua calls push or replace frames and continue the outer loop,
  so call depth never consumes native stack. Only host-initiated
  re-entry (metamethods, iterators, resume) nests natively.

  Frame state (pc, top) is kept in locals for the hot path and synced
  back before any operation that can error, call out, or switch frames.
----------------------------------------------------------------------*/

mod arith_ops;
pub(crate) mod call;
mod metamethod;
mod table_ops;

pub use call::call_value;
pub(crate) use call::{
    call_native_fn, check_depth, finish_return, resolve_callable, resume_coroutine, yield_values,
};
pub use metamethod::{TmKind, get_metamethod, get_metatable};

pub(crate) use arith_ops::{
    ArithOp, arith, concat_pair, length_of, less_equal, less_than, values_equal,
};
pub(crate) use table_ops::{index_value, newindex_value};

use crate::lua_value::{LuaClosure, LuaTable, LuaValue};
use crate::lua_vm::lua_thread::{LuaCallFrame, PendingCall, RetTarget};
use crate::lua_vm::opcode::OpCode;
use crate::lua_vm::opcode::instruction::{
    FIELDS_PER_FLUSH, constant_index, decode_float_byte, is_constant,
};
use crate::lua_vm::{LuaError, LuaResult, LuaState};
use crate::{get_a, get_b, get_bx, get_c, get_op, get_sbx};
use std::cell::RefCell;
use std::rc::Rc;

type Regs = Rc<RefCell<Vec<LuaValue>>>;

/// RK operand: register or constant-pool value
#[inline(always)]
fn rk(regs: &Regs, constants: &[LuaValue], operand: usize) -> LuaValue {
    if is_constant(operand) {
        constants
            .get(constant_index(operand))
            .cloned()
            .unwrap_or(LuaValue::Nil)
    } else {
        regs.borrow()[operand].clone()
    }
}

/// Store pc/top back into the top frame (before any fallible operation,
/// so error positions and re-entry see current state)
fn sync_frame(l: &mut LuaState, pc: usize, top: usize) {
    let mut th = l.thread.borrow_mut();
    let frame = th.frames.last_mut().expect("executing without a frame");
    frame.pc = pc;
    frame.top = top;
}

/// Arguments of a CALL/TAILCALL at base register `a`
fn collect_args(regs: &Regs, a: usize, b: usize, top: usize) -> Vec<LuaValue> {
    let r = regs.borrow();
    let end = if b == 0 { top } else { a + b };
    let end = end.min(r.len());
    if end <= a + 1 {
        Vec::new()
    } else {
        r[a + 1..end].to_vec()
    }
}

/// Write call results at `a` per the C-1 convention; MULTRET raises `top`
fn write_results(regs: &Regs, a: usize, want: i32, results: &[LuaValue], top: &mut usize) {
    let mut r = regs.borrow_mut();
    if want < 0 {
        if r.len() < a + results.len() {
            r.resize(a + results.len(), LuaValue::Nil);
        }
        for (i, v) in results.iter().enumerate() {
            r[a + i] = v.clone();
        }
        *top = a + results.len();
    } else {
        let want = want as usize;
        if r.len() < a + want {
            r.resize(a + want, LuaValue::Nil);
        }
        for i in 0..want {
            r[a + i] = results.get(i).cloned().unwrap_or(LuaValue::Nil);
        }
    }
}

/// Execute until the current thread's call depth drops to `target_depth`.
/// Frames left above the target on error are the caller's to unwind.
pub fn lua_execute(l: &mut LuaState, target_depth: usize) -> LuaResult<()> {
    'startfunc: loop {
        // ===== load frame context =====
        let (closure, regs, mut pc, mut top) = {
            let th = l.thread.borrow();
            if th.depth() <= target_depth {
                return Ok(());
            }
            let frame = th.frames.last().expect("depth checked");
            (frame.closure.clone(), frame.regs.clone(), frame.pc, frame.top)
        };
        let chunk = closure.chunk.clone();

        loop {
            let word = match chunk.code.get(pc) {
                Some(&w) => w,
                None => {
                    sync_frame(l, pc, top);
                    return Err(l.error("unbalanced function (no return)"));
                }
            };
            pc += 1;
            let Some(op) = OpCode::from_u6(get_op!(word)) else {
                sync_frame(l, pc, top);
                return Err(l.error(format!("unknown opcode {}", get_op!(word))));
            };

            match op {
                OpCode::Move => {
                    let v = regs.borrow()[get_b!(word)].clone();
                    regs.borrow_mut()[get_a!(word)] = v;
                }

                OpCode::LoadK => {
                    let v = chunk
                        .constants
                        .get(get_bx!(word))
                        .cloned()
                        .unwrap_or(LuaValue::Nil);
                    regs.borrow_mut()[get_a!(word)] = v;
                }

                OpCode::LoadBool => {
                    regs.borrow_mut()[get_a!(word)] = LuaValue::Boolean(get_b!(word) != 0);
                    if get_c!(word) != 0 {
                        pc += 1;
                    }
                }

                OpCode::LoadNil => {
                    let mut r = regs.borrow_mut();
                    for i in get_a!(word)..=get_b!(word) {
                        r[i] = LuaValue::Nil;
                    }
                }

                OpCode::GetUpval => {
                    let Some(cell) = closure.upvalues.get(get_b!(word)) else {
                        sync_frame(l, pc, top);
                        return Err(l.error("invalid upvalue index"));
                    };
                    let v = crate::lua_vm::upvalue::Upvalue::get(cell);
                    regs.borrow_mut()[get_a!(word)] = v;
                }

                OpCode::SetUpval => {
                    let Some(cell) = closure.upvalues.get(get_b!(word)) else {
                        sync_frame(l, pc, top);
                        return Err(l.error("invalid upvalue index"));
                    };
                    let v = regs.borrow()[get_a!(word)].clone();
                    crate::lua_vm::upvalue::Upvalue::set(cell, v);
                }

                OpCode::GetGlobal => {
                    let key = chunk
                        .constants
                        .get(get_bx!(word))
                        .cloned()
                        .unwrap_or(LuaValue::Nil);
                    sync_frame(l, pc, top);
                    let globals = l.vm.globals_value();
                    let v = index_value(l, &globals, &key)?;
                    regs.borrow_mut()[get_a!(word)] = v;
                }

                OpCode::SetGlobal => {
                    let key = chunk
                        .constants
                        .get(get_bx!(word))
                        .cloned()
                        .unwrap_or(LuaValue::Nil);
                    let v = regs.borrow()[get_a!(word)].clone();
                    sync_frame(l, pc, top);
                    let globals = l.vm.globals_value();
                    newindex_value(l, &globals, &key, v)?;
                }

                OpCode::GetTable => {
                    let t = regs.borrow()[get_b!(word)].clone();
                    let key = rk(&regs, &chunk.constants, get_c!(word));
                    sync_frame(l, pc, top);
                    let v = index_value(l, &t, &key)?;
                    regs.borrow_mut()[get_a!(word)] = v;
                }

                OpCode::SetTable => {
                    let t = regs.borrow()[get_a!(word)].clone();
                    let key = rk(&regs, &chunk.constants, get_b!(word));
                    let v = rk(&regs, &chunk.constants, get_c!(word));
                    sync_frame(l, pc, top);
                    newindex_value(l, &t, &key, v)?;
                }

                OpCode::NewTable => {
                    let asize = decode_float_byte(get_b!(word));
                    let hsize = decode_float_byte(get_c!(word));
                    regs.borrow_mut()[get_a!(word)] =
                        LuaValue::Table(Rc::new(RefCell::new(LuaTable::new(asize, hsize))));
                }

                OpCode::Self_ => {
                    let a = get_a!(word);
                    let t = regs.borrow()[get_b!(word)].clone();
                    let key = rk(&regs, &chunk.constants, get_c!(word));
                    regs.borrow_mut()[a + 1] = t.clone();
                    sync_frame(l, pc, top);
                    let v = index_value(l, &t, &key)?;
                    regs.borrow_mut()[a] = v;
                }

                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Pow => {
                    let b = rk(&regs, &chunk.constants, get_b!(word));
                    let c = rk(&regs, &chunk.constants, get_c!(word));
                    let arith_op = match op {
                        OpCode::Add => ArithOp::Add,
                        OpCode::Sub => ArithOp::Sub,
                        OpCode::Mul => ArithOp::Mul,
                        OpCode::Div => ArithOp::Div,
                        OpCode::Mod => ArithOp::Mod,
                        _ => ArithOp::Pow,
                    };
                    let v = if let (LuaValue::Number(x), LuaValue::Number(y)) = (&b, &c) {
                        LuaValue::Number(arith_op.apply(*x, *y))
                    } else {
                        sync_frame(l, pc, top);
                        arith(l, arith_op, &b, &c)?
                    };
                    regs.borrow_mut()[get_a!(word)] = v;
                }

                OpCode::Unm => {
                    let v = regs.borrow()[get_b!(word)].clone();
                    let r = if let LuaValue::Number(x) = v {
                        LuaValue::Number(-x)
                    } else {
                        sync_frame(l, pc, top);
                        arith(l, ArithOp::Unm, &v, &v)?
                    };
                    regs.borrow_mut()[get_a!(word)] = r;
                }

                OpCode::Not => {
                    let truthy = regs.borrow()[get_b!(word)].is_truthy();
                    regs.borrow_mut()[get_a!(word)] = LuaValue::Boolean(!truthy);
                }

                OpCode::Len => {
                    let v = regs.borrow()[get_b!(word)].clone();
                    sync_frame(l, pc, top);
                    let len = length_of(l, &v)?;
                    regs.borrow_mut()[get_a!(word)] = len;
                }

                OpCode::Concat => {
                    // right-associative over R[B..=C]
                    let b = get_b!(word);
                    let c = get_c!(word);
                    sync_frame(l, pc, top);
                    let mut acc = regs.borrow()[c].clone();
                    let mut i = c;
                    while i > b {
                        i -= 1;
                        let left = regs.borrow()[i].clone();
                        acc = concat_pair(l, &left, &acc)?;
                    }
                    regs.borrow_mut()[get_a!(word)] = acc;
                }

                OpCode::Jmp => {
                    // A carries a 1-based close hint for broken scopes
                    let a = get_a!(word);
                    if a > 0 {
                        let mut th = l.thread.borrow_mut();
                        th.frames
                            .last_mut()
                            .expect("executing without a frame")
                            .close_upvalues(a - 1);
                    }
                    pc = (pc as i64 + get_sbx!(word) as i64) as usize;
                }

                OpCode::Eq | OpCode::Lt | OpCode::Le => {
                    let bv = rk(&regs, &chunk.constants, get_b!(word));
                    let cv = rk(&regs, &chunk.constants, get_c!(word));
                    sync_frame(l, pc, top);
                    let outcome = match op {
                        OpCode::Eq => values_equal(l, &bv, &cv)?,
                        OpCode::Lt => less_than(l, &bv, &cv)?,
                        _ => less_equal(l, &bv, &cv)?,
                    };
                    if outcome != (get_a!(word) != 0) {
                        pc += 1;
                    }
                }

                OpCode::Test => {
                    let truthy = regs.borrow()[get_a!(word)].is_truthy();
                    if truthy != (get_c!(word) != 0) {
                        pc += 1;
                    }
                }

                OpCode::TestSet => {
                    let v = regs.borrow()[get_b!(word)].clone();
                    if v.is_truthy() == (get_c!(word) != 0) {
                        regs.borrow_mut()[get_a!(word)] = v;
                    } else {
                        pc += 1;
                    }
                }

                OpCode::Call => {
                    let a = get_a!(word);
                    let want = get_c!(word) as i32 - 1;
                    let func = regs.borrow()[a].clone();
                    let mut args = collect_args(&regs, a, get_b!(word), top);
                    sync_frame(l, pc, top);
                    let callee = resolve_callable(l, func, &mut args)?;
                    match callee {
                        LuaValue::Closure(cl) => {
                            check_depth(l)?;
                            let frame =
                                LuaCallFrame::new(cl, args, Some(RetTarget { reg: a, want }));
                            l.thread.borrow_mut().frames.push(frame);
                            continue 'startfunc;
                        }
                        LuaValue::Function(_) | LuaValue::NativeClosure(_) => {
                            let outcome = match &callee {
                                LuaValue::Function(f) => call_native_fn(l, *f, Vec::new(), args),
                                LuaValue::NativeClosure(nc) => {
                                    call_native_fn(l, nc.func, nc.bound.clone(), args)
                                }
                                _ => unreachable!(),
                            };
                            match outcome {
                                Ok(results) => {
                                    write_results(&regs, a, want, &results, &mut top);
                                }
                                Err(LuaError::Yield) => {
                                    let mut th = l.thread.borrow_mut();
                                    let frame =
                                        th.frames.last_mut().expect("executing without a frame");
                                    frame.pending_call =
                                        Some(PendingCall::Call(RetTarget { reg: a, want }));
                                    frame.pc = pc;
                                    frame.top = top;
                                    return Err(LuaError::Yield);
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        _ => unreachable!("resolve_callable returns functions only"),
                    }
                }

                OpCode::TailCall => {
                    let a = get_a!(word);
                    let func = regs.borrow()[a].clone();
                    let mut args = collect_args(&regs, a, get_b!(word), top);
                    sync_frame(l, pc, top);
                    let callee = resolve_callable(l, func, &mut args)?;
                    // leaving this frame's scope for good
                    l.thread
                        .borrow_mut()
                        .frames
                        .last_mut()
                        .expect("executing without a frame")
                        .close_upvalues(0);
                    match callee {
                        LuaValue::Closure(cl) => {
                            // replace in place: constant frame depth
                            let mut th = l.thread.borrow_mut();
                            let old = th.frames.pop().expect("tailcall without a frame");
                            th.frames
                                .push(LuaCallFrame::new(cl, args, old.ret_target));
                            drop(th);
                            continue 'startfunc;
                        }
                        LuaValue::Function(_) | LuaValue::NativeClosure(_) => {
                            let outcome = match &callee {
                                LuaValue::Function(f) => call_native_fn(l, *f, Vec::new(), args),
                                LuaValue::NativeClosure(nc) => {
                                    call_native_fn(l, nc.func, nc.bound.clone(), args)
                                }
                                _ => unreachable!(),
                            };
                            match outcome {
                                Ok(results) => {
                                    finish_return(l, results);
                                    continue 'startfunc;
                                }
                                Err(LuaError::Yield) => {
                                    let mut th = l.thread.borrow_mut();
                                    let frame =
                                        th.frames.last_mut().expect("executing without a frame");
                                    frame.pending_call = Some(PendingCall::TailReturn);
                                    frame.pc = pc;
                                    frame.top = top;
                                    return Err(LuaError::Yield);
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        _ => unreachable!("resolve_callable returns functions only"),
                    }
                }

                OpCode::Return => {
                    let a = get_a!(word);
                    let b = get_b!(word);
                    let results = {
                        let r = regs.borrow();
                        match b {
                            0 => r[a..top.max(a).min(r.len())].to_vec(),
                            1 => Vec::new(),
                            n => r[a..(a + n - 1).min(r.len())].to_vec(),
                        }
                    };
                    l.thread
                        .borrow_mut()
                        .frames
                        .last_mut()
                        .expect("executing without a frame")
                        .close_upvalues(0);
                    finish_return(l, results);
                    continue 'startfunc;
                }

                OpCode::ForPrep => {
                    let a = get_a!(word);
                    sync_frame(l, pc, top);
                    let (init, limit, step) = {
                        let r = regs.borrow();
                        (r[a].clone(), r[a + 1].clone(), r[a + 2].clone())
                    };
                    let Some(init) = init.as_number() else {
                        return Err(l.error("'for' initial value must be a number"));
                    };
                    let Some(limit) = limit.as_number() else {
                        return Err(l.error("'for' limit must be a number"));
                    };
                    let Some(step) = step.as_number() else {
                        return Err(l.error("'for' step must be a number"));
                    };
                    {
                        let mut r = regs.borrow_mut();
                        r[a] = LuaValue::Number(init - step);
                        r[a + 1] = LuaValue::Number(limit);
                        r[a + 2] = LuaValue::Number(step);
                    }
                    pc = (pc as i64 + get_sbx!(word) as i64) as usize;
                }

                OpCode::ForLoop => {
                    let a = get_a!(word);
                    let numbers = {
                        let r = regs.borrow();
                        (r[a].as_number(), r[a + 1].as_number(), r[a + 2].as_number())
                    };
                    let (idx, limit, step) = match numbers {
                        (Some(idx), Some(limit), Some(step)) => (idx, limit, step),
                        _ => {
                            sync_frame(l, pc, top);
                            return Err(l.error("'for' initial value must be a number"));
                        }
                    };
                    let idx = idx + step;
                    regs.borrow_mut()[a] = LuaValue::Number(idx);
                    let continues = if step > 0.0 { idx <= limit } else { limit <= idx };
                    if continues {
                        regs.borrow_mut()[a + 3] = LuaValue::Number(idx);
                        pc = (pc as i64 + get_sbx!(word) as i64) as usize;
                    }
                }

                OpCode::TForLoop => {
                    let a = get_a!(word);
                    let nres = get_c!(word).max(1);
                    let (func, state, control) = {
                        let r = regs.borrow();
                        (r[a].clone(), r[a + 1].clone(), r[a + 2].clone())
                    };
                    sync_frame(l, pc, top);
                    let results = call_value(l, func, vec![state, control])?;
                    {
                        let mut r = regs.borrow_mut();
                        if r.len() < a + 3 + nres {
                            r.resize(a + 3 + nres, LuaValue::Nil);
                        }
                        for i in 0..nres {
                            r[a + 3 + i] = results.get(i).cloned().unwrap_or(LuaValue::Nil);
                        }
                    }
                    let first = regs.borrow()[a + 3].clone();
                    if first.is_nil() {
                        // iterator exhausted: skip the loop-back JMP
                        pc += 1;
                    } else {
                        regs.borrow_mut()[a + 2] = first;
                    }
                }

                OpCode::Vararg => {
                    let a = get_a!(word);
                    let b = get_b!(word);
                    let varargs = {
                        let th = l.thread.borrow();
                        th.frames
                            .last()
                            .expect("executing without a frame")
                            .varargs
                            .clone()
                    };
                    let mut r = regs.borrow_mut();
                    if b == 0 {
                        let n = varargs.len();
                        if r.len() < a + n {
                            r.resize(a + n, LuaValue::Nil);
                        }
                        for (i, v) in varargs.into_iter().enumerate() {
                            r[a + i] = v;
                        }
                        top = a + n;
                    } else {
                        let want = b - 1;
                        if r.len() < a + want {
                            r.resize(a + want, LuaValue::Nil);
                        }
                        for i in 0..want {
                            r[a + i] = varargs.get(i).cloned().unwrap_or(LuaValue::Nil);
                        }
                    }
                }

                OpCode::Closure => {
                    let a = get_a!(word);
                    let Some(proto) = chunk.child_protos.get(get_bx!(word)) else {
                        sync_frame(l, pc, top);
                        return Err(l.error("invalid prototype index"));
                    };
                    let count = proto.upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(count);
                    for j in 0..count {
                        let Some(&binding) = chunk.code.get(pc + j) else {
                            sync_frame(l, pc, top);
                            return Err(l.error("invalid upvalue binding instruction"));
                        };
                        match OpCode::from_u6(get_op!(binding)) {
                            Some(OpCode::Move) => {
                                // capture (or share) an open cell on this frame
                                let reg = get_b!(binding);
                                let cell = {
                                    let mut th = l.thread.borrow_mut();
                                    th.frames
                                        .last_mut()
                                        .expect("executing without a frame")
                                        .find_or_create_upvalue(reg)
                                };
                                upvalues.push(cell);
                            }
                            Some(OpCode::GetUpval) => {
                                // alias one of this closure's own cells
                                let Some(cell) = closure.upvalues.get(get_b!(binding)) else {
                                    sync_frame(l, pc, top);
                                    return Err(l.error("invalid upvalue index"));
                                };
                                upvalues.push(cell.clone());
                            }
                            _ => {
                                sync_frame(l, pc, top);
                                return Err(l.error("invalid upvalue binding instruction"));
                            }
                        }
                    }
                    pc += count;
                    regs.borrow_mut()[a] = LuaValue::Closure(Rc::new(LuaClosure {
                        chunk: proto.clone(),
                        upvalues,
                    }));
                }

                OpCode::Close => {
                    let a = get_a!(word);
                    let mut th = l.thread.borrow_mut();
                    th.frames
                        .last_mut()
                        .expect("executing without a frame")
                        .close_upvalues(a);
                }

                OpCode::SetList => {
                    let a = get_a!(word);
                    let b = get_b!(word);
                    let c = get_c!(word);
                    let count = if b == 0 { top.saturating_sub(a + 1) } else { b };
                    let block = if c == 0 {
                        // block index spilled into the next instruction word
                        let Some(&extra) = chunk.code.get(pc) else {
                            sync_frame(l, pc, top);
                            return Err(l.error("missing SETLIST block argument"));
                        };
                        pc += 1;
                        extra as usize
                    } else {
                        c
                    };
                    if block == 0 {
                        sync_frame(l, pc, top);
                        return Err(l.error("invalid SETLIST block argument"));
                    }
                    let t = regs.borrow()[a].clone();
                    let Some(table) = t.as_table() else {
                        sync_frame(l, pc, top);
                        return Err(l.error(format!(
                            "attempt to index a {} value",
                            t.type_name()
                        )));
                    };
                    let values = {
                        let r = regs.borrow();
                        r[a + 1..(a + 1 + count).min(r.len())].to_vec()
                    };
                    let base = (block - 1) * FIELDS_PER_FLUSH;
                    let mut tb = table.borrow_mut();
                    for (i, v) in values.into_iter().enumerate() {
                        tb.raw_seti((base + i + 1) as i64, v);
                    }
                }
            }
        }
    }
}
