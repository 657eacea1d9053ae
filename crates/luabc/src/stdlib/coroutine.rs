// Coroutine library
// Implements: create, resume, yield, status, wrap, running

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, NativeClosure, tostring_value};
use crate::lua_vm::execute::{resume_coroutine, yield_values};
use crate::lua_vm::lua_thread::{CoStatus, LuaThread};
use crate::lua_vm::{LuaResult, LuaState};
use std::cell::RefCell;
use std::rc::Rc;

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "wrap" => coroutine_wrap,
        "running" => coroutine_running,
    })
}

/// coroutine.create(f) - New suspended coroutine; f runs on first resume
fn coroutine_create(l: &mut LuaState) -> LuaResult<usize> {
    let func = match l.get_arg(1) {
        Some(f @ LuaValue::Closure(_)) => f,
        _ => {
            return Err(l.error("bad argument #1 to 'create' (Lua function expected)"));
        }
    };
    let thread = LuaValue::Thread(Rc::new(RefCell::new(LuaThread::coroutine(func))));
    l.push_value(thread)?;
    Ok(1)
}

/// coroutine.resume(co, ...) - (true, values...) or (false, message)
fn coroutine_resume(l: &mut LuaState) -> LuaResult<usize> {
    let thread = match l.get_arg(1) {
        Some(LuaValue::Thread(t)) => t,
        _ => {
            return Err(l.error("bad argument #1 to 'resume' (coroutine expected)"));
        }
    };
    let args = {
        let all = l.get_args();
        all[1..].to_vec()
    };
    let (ok, values) = resume_coroutine(l, &thread, args);
    l.push_value(LuaValue::Boolean(ok))?;
    let count = values.len();
    for v in values {
        l.push_value(v)?;
    }
    Ok(1 + count)
}

/// coroutine.yield(...) - Unwind to the nearest resume
fn coroutine_yield(l: &mut LuaState) -> LuaResult<usize> {
    let args = l.get_args();
    Err(yield_values(l, args))
}

/// coroutine.status(co) - suspended / running / normal / dead
fn coroutine_status(l: &mut LuaState) -> LuaResult<usize> {
    let thread = match l.get_arg(1) {
        Some(LuaValue::Thread(t)) => t,
        _ => {
            return Err(l.error("bad argument #1 to 'status' (coroutine expected)"));
        }
    };
    let status = thread.borrow().status;
    let name = match status {
        CoStatus::Running => {
            // running means *this* thread; a coroutine that resumed
            // another one is merely active
            if Rc::ptr_eq(&thread, &l.thread) {
                "running"
            } else {
                "normal"
            }
        }
        other => other.name(),
    };
    let result = l.create_string(name);
    l.push_value(result)?;
    Ok(1)
}

/// coroutine.wrap(f) - A callable that resumes and re-raises failures
fn coroutine_wrap(l: &mut LuaState) -> LuaResult<usize> {
    let func = match l.get_arg(1) {
        Some(f @ LuaValue::Closure(_)) => f,
        _ => {
            return Err(l.error("bad argument #1 to 'wrap' (Lua function expected)"));
        }
    };
    let thread = LuaValue::Thread(Rc::new(RefCell::new(LuaThread::coroutine(func))));
    let wrapper = LuaValue::NativeClosure(Rc::new(NativeClosure {
        func: wrap_call,
        bound: vec![thread],
    }));
    l.push_value(wrapper)?;
    Ok(1)
}

fn wrap_call(l: &mut LuaState) -> LuaResult<usize> {
    let Some(LuaValue::Thread(thread)) = l.bound_value(1) else {
        return Err(l.error("wrapped coroutine is missing"));
    };
    let args = l.get_args();
    let (ok, values) = resume_coroutine(l, &thread, args);
    if !ok {
        let message = values
            .first()
            .map(tostring_value)
            .unwrap_or_else(|| "error in wrapped coroutine".to_string());
        // the message already carries its position prefix
        return Err(l.error_unprefixed(message));
    }
    let count = values.len();
    for v in values {
        l.push_value(v)?;
    }
    Ok(count)
}

/// coroutine.running() - The running coroutine, or nil for the root
fn coroutine_running(l: &mut LuaState) -> LuaResult<usize> {
    if l.thread.borrow().is_main {
        l.push_value(LuaValue::Nil)?;
    } else {
        let current = LuaValue::Thread(l.thread.clone());
        l.push_value(current)?;
    }
    Ok(1)
}
