// Call plumbing: callable resolution, host calls, frame returns,
// host-boundary re-entry and coroutine resume.

use super::lua_execute;
use super::metamethod::{TmKind, get_metamethod};
use super::table_ops::MAX_TM_CHAIN;
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_thread::{CoStatus, LuaCallFrame, LuaThread, PendingCall};
use crate::lua_vm::{CFunction, LuaError, LuaResult, LuaState};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) fn check_depth(l: &mut LuaState) -> LuaResult<()> {
    if l.thread.borrow().depth() >= l.vm.options.max_call_depth {
        l.vm.error_message = "stack overflow".to_string();
        return Err(LuaError::StackOverflow);
    }
    Ok(())
}

/// Follow __call until an actual function surfaces; each hop prepends the
/// original value to the argument list.
pub(crate) fn resolve_callable(
    l: &mut LuaState,
    mut func: LuaValue,
    args: &mut Vec<LuaValue>,
) -> LuaResult<LuaValue> {
    let mut hops = 0;
    loop {
        if func.is_function() {
            return Ok(func);
        }
        let Some(handler) = get_metamethod(l.vm, &func, TmKind::Call) else {
            return Err(l.error(format!("attempt to call a {} value", func.type_name())));
        };
        args.insert(0, func);
        func = handler;
        hops += 1;
        if hops > MAX_TM_CHAIN {
            return Err(l.error("'__call' chain too long; possible loop"));
        }
    }
}

/// Invoke a host function. The active argument/result areas are saved
/// around the call so host functions may re-enter the VM freely.
pub(crate) fn call_native_fn(
    l: &mut LuaState,
    func: CFunction,
    bound: Vec<LuaValue>,
    args: Vec<LuaValue>,
) -> LuaResult<Vec<LuaValue>> {
    let saved_args = std::mem::replace(&mut l.call_args, args);
    let saved_results = std::mem::take(&mut l.call_results);
    let saved_bound = std::mem::replace(&mut l.bound, bound);
    let outcome = func(l);
    let mut results = std::mem::replace(&mut l.call_results, saved_results);
    l.call_args = saved_args;
    l.bound = saved_bound;
    let count = outcome?;
    let keep_from = results.len().saturating_sub(count);
    Ok(results.split_off(keep_from))
}

/// Call from the host side: metamethods, iterators, the embedder.
/// Lua frames run to completion before this returns, so a yield cannot
/// cross this boundary.
pub fn call_value(
    l: &mut LuaState,
    func: LuaValue,
    mut args: Vec<LuaValue>,
) -> LuaResult<Vec<LuaValue>> {
    let func = resolve_callable(l, func, &mut args)?;
    match func {
        LuaValue::Function(f) => call_native_fn(l, f, Vec::new(), args),
        LuaValue::NativeClosure(nc) => call_native_fn(l, nc.func, nc.bound.clone(), args),
        LuaValue::Closure(closure) => {
            check_depth(l)?;
            let target = l.thread.borrow().depth();
            l.thread
                .borrow_mut()
                .frames
                .push(LuaCallFrame::new(closure, args, None));
            match lua_execute(l, target) {
                Ok(()) => Ok(std::mem::take(&mut l.thread.borrow_mut().transfer)),
                Err(LuaError::Yield) => {
                    unwind_to(l, target);
                    Err(l.error("attempt to yield across metamethod/C-call boundary"))
                }
                Err(e) => {
                    unwind_to(l, target);
                    Err(e)
                }
            }
        }
        _ => unreachable!("resolve_callable returns functions only"),
    }
}

/// First result of a metamethod call (tuple results are truncated)
pub(crate) fn call_metamethod(
    l: &mut LuaState,
    handler: LuaValue,
    args: Vec<LuaValue>,
) -> LuaResult<LuaValue> {
    Ok(call_value(l, handler, args)?
        .into_iter()
        .next()
        .unwrap_or(LuaValue::Nil))
}

/// Pop the top frame and route its results: into the caller's registers
/// per the frame's return target, or to the thread's transfer buffer when
/// this was a host-boundary entry frame.
pub(crate) fn finish_return(l: &mut LuaState, results: Vec<LuaValue>) {
    let mut th = l.thread.borrow_mut();
    let frame = th.frames.pop().expect("return without a frame");
    match frame.ret_target {
        Some(rt) => {
            let caller = th.frames.last_mut().expect("return target without caller");
            let mut regs = caller.regs.borrow_mut();
            if rt.want < 0 {
                if regs.len() < rt.reg + results.len() {
                    regs.resize(rt.reg + results.len(), LuaValue::Nil);
                }
                for (i, v) in results.iter().enumerate() {
                    regs[rt.reg + i] = v.clone();
                }
                caller.top = rt.reg + results.len();
            } else {
                let want = rt.want as usize;
                if regs.len() < rt.reg + want {
                    regs.resize(rt.reg + want, LuaValue::Nil);
                }
                for i in 0..want {
                    regs[rt.reg + i] = results.get(i).cloned().unwrap_or(LuaValue::Nil);
                }
            }
        }
        None => th.transfer = results,
    }
}

/// Pop frames above `target`, closing their open up-values (error path)
pub(crate) fn unwind_to(l: &mut LuaState, target: usize) {
    let mut th = l.thread.borrow_mut();
    while th.depth() > target {
        let mut frame = th.frames.pop().expect("unwind depth checked");
        frame.close_upvalues(0);
    }
}

/// Signal a yield: stash the values on the current thread and hand back
/// the unwind token. Yielding the root thread is an error.
pub(crate) fn yield_values(l: &mut LuaState, values: Vec<LuaValue>) -> LuaError {
    if l.thread.borrow().is_main {
        return l.error("attempt to yield from outside a coroutine");
    }
    l.thread.borrow_mut().transfer = values;
    LuaError::Yield
}

/// Resume a coroutine with `args`. All failures surface as
/// `(false, message)`; success is `(true, yielded-or-returned values)`.
pub(crate) fn resume_coroutine(
    l: &mut LuaState,
    co: &Rc<RefCell<LuaThread>>,
    args: Vec<LuaValue>,
) -> (bool, Vec<LuaValue>) {
    let status = co.borrow().status;
    match status {
        CoStatus::Dead => {
            return (false, vec![LuaValue::str("cannot resume dead coroutine")]);
        }
        CoStatus::Running => {
            return (
                false,
                vec![LuaValue::str("cannot resume non-suspended coroutine")],
            );
        }
        CoStatus::Suspended => {}
    }
    co.borrow_mut().status = CoStatus::Running;

    let mut sub = l.for_thread(co.clone());

    // Deliver the arguments: as parameters on the first resume, as the
    // interrupted host call's results afterwards.
    let entry = sub.thread.borrow_mut().entry.take();
    match entry {
        Some(LuaValue::Closure(closure)) => {
            sub.thread
                .borrow_mut()
                .frames
                .push(LuaCallFrame::new(closure, args, None));
        }
        Some(_) => {
            co.borrow_mut().status = CoStatus::Dead;
            return (false, vec![LuaValue::str("cannot resume dead coroutine")]);
        }
        None => {
            let pending = {
                let mut th = sub.thread.borrow_mut();
                match th.frames.last_mut() {
                    Some(frame) => frame.pending_call.take(),
                    None => None,
                }
            };
            match pending {
                Some(PendingCall::Call(rt)) => {
                    let mut th = sub.thread.borrow_mut();
                    let frame = th.frames.last_mut().expect("pending call frame");
                    let mut regs = frame.regs.borrow_mut();
                    if rt.want < 0 {
                        if regs.len() < rt.reg + args.len() {
                            regs.resize(rt.reg + args.len(), LuaValue::Nil);
                        }
                        for (i, v) in args.iter().enumerate() {
                            regs[rt.reg + i] = v.clone();
                        }
                        drop(regs);
                        frame.top = rt.reg + args.len();
                    } else {
                        let want = rt.want as usize;
                        if regs.len() < rt.reg + want {
                            regs.resize(rt.reg + want, LuaValue::Nil);
                        }
                        for i in 0..want {
                            regs[rt.reg + i] = args.get(i).cloned().unwrap_or(LuaValue::Nil);
                        }
                    }
                }
                Some(PendingCall::TailReturn) => {
                    finish_return(&mut sub, args);
                }
                None => {
                    // suspended with no pending call and no entry: dead shell
                    co.borrow_mut().status = CoStatus::Dead;
                    return (false, vec![LuaValue::str("cannot resume dead coroutine")]);
                }
            }
        }
    }

    match lua_execute(&mut sub, 0) {
        Ok(()) => {
            let values = std::mem::take(&mut sub.thread.borrow_mut().transfer);
            co.borrow_mut().status = CoStatus::Dead;
            (true, values)
        }
        Err(LuaError::Yield) => {
            let values = std::mem::take(&mut sub.thread.borrow_mut().transfer);
            co.borrow_mut().status = CoStatus::Suspended;
            (true, values)
        }
        Err(_) => {
            unwind_to(&mut sub, 0);
            co.borrow_mut().status = CoStatus::Dead;
            let message = sub.vm.error_message.clone();
            (false, vec![LuaValue::str(&message)])
        }
    }
}
