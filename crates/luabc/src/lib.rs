// Lua 5.1 Bytecode Runtime
// A register VM that executes pre-compiled luac chunks (no source compiler)

#[cfg(test)]
mod test;

pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use lib_registry::LibraryRegistry;
pub use lua_value::chunk_reader::{ChunkFormatError, read_chunk};
pub use lua_value::{Chunk, LuaClosure, LuaString, LuaTable, LuaValue};
pub use lua_vm::{
    CFunction, Instruction, LuaError, LuaFullError, LuaResult, LuaState, LuaVM, OpCode, VmOptions,
};

/// Main entry point for executing a compiled chunk image
pub fn execute(bytes: &[u8]) -> Result<Vec<LuaValue>, LuaFullError> {
    // Create VM, install the standard globals, load and run
    let mut vm = LuaVM::new(VmOptions::default());
    vm.open_libs();
    let chunk = vm.load(bytes).map_err(LuaFullError::from_format)?;
    vm.execute(chunk).map_err(|e| vm.into_full_error(e))
}

/// Execute a compiled chunk image with a custom VM instance
pub fn execute_with_vm(vm: &mut LuaVM, bytes: &[u8]) -> Result<Vec<LuaValue>, LuaFullError> {
    let chunk = vm.load(bytes).map_err(LuaFullError::from_format)?;
    vm.execute(chunk).map_err(|e| vm.into_full_error(e))
}
