// Execution context handed to host functions and the executor.
// Wraps the VM plus the thread currently advancing, and carries the
// argument/result areas of the active host call.

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult, LuaThread, LuaVM};
use std::cell::RefCell;
use std::rc::Rc;

pub struct LuaState<'vm> {
    pub(crate) vm: &'vm mut LuaVM,
    /// Thread currently advancing (main thread or a coroutine)
    pub(crate) thread: Rc<RefCell<LuaThread>>,
    /// Arguments of the active host call, 1-based access
    pub(crate) call_args: Vec<LuaValue>,
    /// Results pushed by the active host call
    pub(crate) call_results: Vec<LuaValue>,
    /// Bound values of the active native closure
    pub(crate) bound: Vec<LuaValue>,
}

impl<'vm> LuaState<'vm> {
    pub(crate) fn new(vm: &'vm mut LuaVM, thread: Rc<RefCell<LuaThread>>) -> Self {
        LuaState {
            vm,
            thread,
            call_args: Vec::new(),
            call_results: Vec::new(),
            bound: Vec::new(),
        }
    }

    /// A context advancing another thread (coroutine resume)
    pub(crate) fn for_thread(&mut self, thread: Rc<RefCell<LuaThread>>) -> LuaState<'_> {
        LuaState::new(&mut *self.vm, thread)
    }

    #[inline]
    pub fn vm(&self) -> &LuaVM {
        self.vm
    }

    #[inline]
    pub fn vm_mut(&mut self) -> &mut LuaVM {
        self.vm
    }

    // ---- host-call surface ----

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.call_args.len()
    }

    /// Argument `n` of the active host call (1-based)
    #[inline]
    pub fn get_arg(&self, n: usize) -> Option<LuaValue> {
        if n == 0 {
            return None;
        }
        self.call_args.get(n - 1).cloned()
    }

    pub fn get_args(&self) -> Vec<LuaValue> {
        self.call_args.clone()
    }

    /// Push one result of the active host call
    pub fn push_value(&mut self, value: LuaValue) -> LuaResult<()> {
        self.call_results.push(value);
        Ok(())
    }

    /// Bound value `n` of the active native closure (1-based)
    pub fn bound_value(&self, n: usize) -> Option<LuaValue> {
        if n == 0 {
            return None;
        }
        self.bound.get(n - 1).cloned()
    }

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::str(s)
    }

    pub fn globals(&self) -> LuaValue {
        self.vm.globals_value()
    }

    /// Call any callable, running Lua frames to completion
    pub fn call_value(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        crate::lua_vm::execute::call_value(self, func, args)
    }

    // ---- errors ----

    /// Raise a runtime error: stores the position-prefixed message on the
    /// VM and returns the token to propagate.
    pub fn error(&mut self, message: impl Into<String>) -> LuaError {
        let message = message.into();
        self.vm.error_message = format!("{}{}", self.position_prefix(), message);
        LuaError::RuntimeError
    }

    /// Raise a runtime error whose message is already complete
    pub(crate) fn error_unprefixed(&mut self, message: impl Into<String>) -> LuaError {
        self.vm.error_message = message.into();
        LuaError::RuntimeError
    }

    /// `source:line: ` of the instruction the current frame is executing
    fn position_prefix(&self) -> String {
        let th = self.thread.borrow();
        match th.frames.last() {
            Some(frame) => {
                let chunk = &frame.closure.chunk;
                let line = chunk.line_at(frame.pc.saturating_sub(1));
                format!("{}:{}: ", chunk.display_source(), line)
            }
            None => String::new(),
        }
    }
}
