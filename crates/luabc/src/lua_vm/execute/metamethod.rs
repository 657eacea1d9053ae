// Metamethod events and lookup

use crate::lua_value::LuaValue;
use crate::lua_vm::LuaVM;

/// The named metamethod events of Lua 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Concat,
    Len,
    Eq,
    Lt,
    Le,
    Index,
    NewIndex,
    Call,
    Metatable,
}

impl TmKind {
    pub fn name(self) -> &'static str {
        match self {
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Div => "__div",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Unm => "__unm",
            TmKind::Concat => "__concat",
            TmKind::Len => "__len",
            TmKind::Eq => "__eq",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Call => "__call",
            TmKind::Metatable => "__metatable",
        }
    }
}

/// Metatable of a value: tables carry their own, strings share the
/// VM-wide one, every other kind has none in this runtime.
pub fn get_metatable(vm: &LuaVM, v: &LuaValue) -> Option<LuaValue> {
    match v {
        LuaValue::Table(t) => t.borrow().metatable(),
        LuaValue::String(_) => vm.string_metatable(),
        _ => None,
    }
}

/// Non-nil handler for `event` on `v`
pub fn get_metamethod(vm: &LuaVM, v: &LuaValue, event: TmKind) -> Option<LuaValue> {
    let mt = get_metatable(vm, v)?;
    let t = mt.as_table()?;
    let handler = t.borrow().raw_get(&LuaValue::str(event.name()));
    if handler.is_nil() { None } else { Some(handler) }
}
