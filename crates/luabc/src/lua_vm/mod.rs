// Lua Virtual Machine
// Global VM state plus the register-based executor for Lua 5.1 bytecode

pub mod execute;
mod lua_error;
mod lua_rng;
mod lua_state;
pub mod lua_thread;
pub mod opcode;
pub mod upvalue;

use crate::lua_value::chunk_reader::{ChunkFormatError, read_chunk};
use crate::lua_value::{Chunk, LuaClosure, LuaTable, LuaValue};
pub use execute::{TmKind, get_metamethod, get_metatable, lua_execute};
pub use lua_error::{LuaError, LuaErrorKind, LuaFullError, LuaResult};
pub(crate) use lua_rng::LuaRng;
pub use lua_state::LuaState;
pub use lua_thread::{CoStatus, LuaCallFrame, LuaThread, PendingCall, RetTarget};
pub use opcode::{Instruction, OpCode};
use std::cell::RefCell;
use std::rc::Rc;

/// Host function type - Rust function callable from Lua.
/// Arguments come from `LuaState::get_arg`, results go through
/// `LuaState::push_value`; the return value is the result count.
pub type CFunction = fn(&mut LuaState) -> LuaResult<usize>;

/// Embedder-tunable limits
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum live call frames per thread
    pub max_call_depth: usize,
    /// Pre-sized hash capacity of the globals table
    pub globals_capacity: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            max_call_depth: 200,
            globals_capacity: 32,
        }
    }
}

/// Global VM state shared by every thread of one interpreter instance.
/// All state is per-VM; dropping the VM drops everything.
pub struct LuaVM {
    /// Global environment table
    pub(crate) globals: Rc<RefCell<LuaTable>>,
    /// Metatable shared by all strings (reserved to the host)
    pub(crate) string_mt: Option<LuaValue>,
    pub(crate) options: VmOptions,
    pub(crate) rng: LuaRng,
    /// Root thread the main chunk runs on
    pub(crate) main_thread: Rc<RefCell<LuaThread>>,
    /// Message of the last raised error
    pub(crate) error_message: String,
}

impl LuaVM {
    pub fn new(options: VmOptions) -> Self {
        let globals = Rc::new(RefCell::new(LuaTable::new(0, options.globals_capacity)));
        LuaVM {
            globals,
            string_mt: None,
            options,
            rng: LuaRng::new(),
            main_thread: Rc::new(RefCell::new(LuaThread::main())),
            error_message: String::new(),
        }
    }

    /// Install the standard globals (print, math, string, coroutine, ...)
    pub fn open_libs(&mut self) {
        crate::stdlib::create_standard_registry().load_all(self);
    }

    /// Materialise a chunk from a `.luac` image. Format failures never
    /// reach the runtime error flow.
    pub fn load(&self, bytes: &[u8]) -> Result<Rc<Chunk>, ChunkFormatError> {
        Ok(Rc::new(read_chunk(bytes)?))
    }

    /// Execute a loaded chunk as the main function, returning its results
    pub fn execute(&mut self, chunk: Rc<Chunk>) -> LuaResult<Vec<LuaValue>> {
        // 5.1 main chunks capture no up-values
        let closure = Rc::new(LuaClosure {
            chunk,
            upvalues: Vec::new(),
        });
        self.call(LuaValue::Closure(closure), Vec::new())
    }

    /// Call any callable from the host with the given arguments
    pub fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let thread = self.main_thread.clone();
        let mut l = LuaState::new(self, thread);
        execute::call_value(&mut l, func, args)
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().raw_get(&LuaValue::str(name))
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        // string keys are never nil or NaN
        let _ = self.globals.borrow_mut().raw_set(LuaValue::str(name), value);
    }

    /// Register a host function as a global by name
    pub fn register_function(&mut self, name: &str, func: CFunction) {
        self.set_global(name, LuaValue::Function(func));
    }

    pub fn globals_value(&self) -> LuaValue {
        LuaValue::Table(self.globals.clone())
    }

    /// Set the metatable shared by all strings. The string library uses
    /// this to route `s:sub(...)`-style calls through `__index`.
    pub fn set_string_metatable(&mut self, meta: LuaValue) {
        self.string_mt = Some(meta);
    }

    pub fn string_metatable(&self) -> Option<LuaValue> {
        self.string_mt.clone()
    }

    /// Message of the most recent error
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Attach the stored message to a caught error token
    pub fn into_full_error(&self, e: LuaError) -> LuaFullError {
        let message = if self.error_message.is_empty() {
            e.to_string()
        } else {
            self.error_message.clone()
        };
        LuaFullError {
            kind: LuaErrorKind::Runtime,
            message,
        }
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        LuaVM::new(VmOptions::default())
    }
}
