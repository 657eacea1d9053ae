// Indexing with the __index / __newindex chains (standard Lua behavior:
// raw access first, function handlers called, table handlers re-indexed)

use super::call::{call_metamethod, call_value};
use super::metamethod::{TmKind, get_metamethod};
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::{LuaResult, LuaState};
use std::cell::RefCell;
use std::rc::Rc;

/// Bound on metamethod chains, against __index loops
pub const MAX_TM_CHAIN: usize = 100;

fn raw_set_checked(
    l: &mut LuaState,
    table: &Rc<RefCell<LuaTable>>,
    key: LuaValue,
    value: LuaValue,
) -> LuaResult<()> {
    table
        .borrow_mut()
        .raw_set(key, value)
        .map_err(|e| l.error(e.message()))
}

/// `t[k]` read through the chain
pub fn index_value(l: &mut LuaState, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
    let mut cur = obj.clone();
    for _ in 0..MAX_TM_CHAIN {
        let handler = match &cur {
            LuaValue::Table(t) => {
                let v = t.borrow().raw_get(key);
                if !v.is_nil() {
                    return Ok(v);
                }
                match get_metamethod(l.vm, &cur, TmKind::Index) {
                    Some(h) => h,
                    None => return Ok(LuaValue::Nil),
                }
            }
            _ => match get_metamethod(l.vm, &cur, TmKind::Index) {
                Some(h) => h,
                None => {
                    return Err(
                        l.error(format!("attempt to index a {} value", cur.type_name()))
                    );
                }
            },
        };
        if handler.is_function() {
            return call_metamethod(l, handler, vec![cur, key.clone()]);
        }
        cur = handler;
    }
    Err(l.error("'__index' chain too long; possible loop"))
}

/// `t[k] = v` write through the chain
pub fn newindex_value(
    l: &mut LuaState,
    obj: &LuaValue,
    key: &LuaValue,
    value: LuaValue,
) -> LuaResult<()> {
    let mut cur = obj.clone();
    for _ in 0..MAX_TM_CHAIN {
        let handler = match &cur {
            LuaValue::Table(t) => {
                let existing = t.borrow().raw_get(key);
                if !existing.is_nil() {
                    let t = t.clone();
                    return raw_set_checked(l, &t, key.clone(), value);
                }
                match get_metamethod(l.vm, &cur, TmKind::NewIndex) {
                    Some(h) => h,
                    None => {
                        let t = t.clone();
                        return raw_set_checked(l, &t, key.clone(), value);
                    }
                }
            }
            _ => match get_metamethod(l.vm, &cur, TmKind::NewIndex) {
                Some(h) => h,
                None => {
                    return Err(
                        l.error(format!("attempt to index a {} value", cur.type_name()))
                    );
                }
            },
        };
        if handler.is_function() {
            call_value(l, handler, vec![cur, key.clone(), value])?;
            return Ok(());
        }
        cur = handler;
    }
    Err(l.error("'__newindex' chain too long; possible loop"))
}
