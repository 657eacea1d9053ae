// Per-thread execution state
// A coroutine owns its whole frame stack, so a suspended thread can be
// re-entered exactly where it yielded; no state lives on the native stack.

use crate::lua_value::{LuaClosure, LuaValue};
use crate::lua_vm::upvalue::{Upvalue, UpvalueRef};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    Suspended,
    Running,
    Dead,
}

impl CoStatus {
    pub fn name(self) -> &'static str {
        match self {
            CoStatus::Suspended => "suspended",
            CoStatus::Running => "running",
            CoStatus::Dead => "dead",
        }
    }
}

/// Where a frame's return values land in its caller:
/// `want` follows the C-1 convention, -1 meaning "all" (MULTRET).
#[derive(Debug, Clone, Copy)]
pub struct RetTarget {
    pub reg: usize,
    pub want: i32,
}

/// A host call interrupted by `yield`; the next resume completes it
#[derive(Debug, Clone, Copy)]
pub enum PendingCall {
    /// An ordinary `CALL`: resume arguments become the call's results
    Call(RetTarget),
    /// A `TAILCALL`: resume arguments become this frame's return values
    TailReturn,
}

pub struct LuaCallFrame {
    pub closure: Rc<LuaClosure>,
    /// Register file; shared so open up-value cells can alias slots
    pub regs: Rc<RefCell<Vec<LuaValue>>>,
    pub pc: usize,
    /// Watermark one past the last live register, for B=0/C=0 forms
    pub top: usize,
    /// Arguments beyond `param_count` of a vararg prototype
    pub varargs: Vec<LuaValue>,
    /// Open cells aliasing this frame, keyed by register index
    pub open_upvalues: Vec<(usize, UpvalueRef)>,
    /// Where to deliver results; `None` for a host-boundary entry frame
    pub ret_target: Option<RetTarget>,
    /// Set when a host call in this frame yielded; the next resume
    /// delivers its arguments as that call's results
    pub pending_call: Option<PendingCall>,
}

impl LuaCallFrame {
    /// Frame entry: parameters into the low registers, extra arguments
    /// kept as varargs when the prototype is variadic.
    pub fn new(
        closure: Rc<LuaClosure>,
        mut args: Vec<LuaValue>,
        ret_target: Option<RetTarget>,
    ) -> Self {
        let chunk = closure.chunk.clone();
        let nparams = chunk.param_count as usize;
        let mut regs = vec![LuaValue::Nil; (chunk.max_stack_size as usize).max(nparams)];
        let varargs = if args.len() > nparams {
            args.split_off(nparams)
        } else {
            Vec::new()
        };
        let varargs = if chunk.is_vararg { varargs } else { Vec::new() };
        for (i, arg) in args.into_iter().enumerate() {
            regs[i] = arg;
        }
        LuaCallFrame {
            closure,
            regs: Rc::new(RefCell::new(regs)),
            pc: 0,
            top: nparams,
            varargs,
            open_upvalues: Vec::new(),
            ret_target,
            pending_call: None,
        }
    }

    /// The shared cell for register `reg`, creating it on first capture
    pub fn find_or_create_upvalue(&mut self, reg: usize) -> UpvalueRef {
        for (idx, cell) in &self.open_upvalues {
            if *idx == reg {
                return cell.clone();
            }
        }
        let cell = Upvalue::open(self.regs.clone(), reg);
        self.open_upvalues.push((reg, cell.clone()));
        cell
    }

    /// Close every open cell at register index >= `from`
    pub fn close_upvalues(&mut self, from: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            if self.open_upvalues[i].0 >= from {
                let (_, cell) = self.open_upvalues.swap_remove(i);
                Upvalue::close(&cell);
            } else {
                i += 1;
            }
        }
    }
}

pub struct LuaThread {
    pub frames: Vec<LuaCallFrame>,
    pub status: CoStatus,
    /// Values crossing the host boundary: results of a finished entry
    /// frame, or the values passed to `yield`
    pub transfer: Vec<LuaValue>,
    /// Body function of a coroutine before its first resume
    pub entry: Option<LuaValue>,
    pub is_main: bool,
}

impl LuaThread {
    pub fn main() -> Self {
        LuaThread {
            frames: Vec::new(),
            status: CoStatus::Running,
            transfer: Vec::new(),
            entry: None,
            is_main: true,
        }
    }

    /// A coroutine: suspended, body held until the first resume
    pub fn coroutine(body: LuaValue) -> Self {
        LuaThread {
            frames: Vec::new(),
            status: CoStatus::Suspended,
            transfer: Vec::new(),
            entry: Some(body),
            is_main: false,
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
