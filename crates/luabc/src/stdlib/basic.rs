// Base library
// Implements: print, tostring, tonumber, type, pairs, ipairs, next,
// select, setmetatable, getmetatable, rawget, rawset, rawequal, unpack,
// assert, error, plus the _G and _VERSION globals

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, tostring_value};
use crate::lua_vm::{LuaError, LuaResult, LuaState, TmKind, get_metamethod, get_metatable};
use std::cell::RefCell;
use std::rc::Rc;

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "print" => lua_print,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "type" => lua_type,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "next" => lua_next,
        "select" => lua_select,
        "setmetatable" => lua_setmetatable,
        "getmetatable" => lua_getmetatable,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawequal" => lua_rawequal,
        "unpack" => lua_unpack,
        "assert" => lua_assert,
        "error" => lua_error,
    })
    .with_initializer(|vm, globals| {
        let g = globals.clone();
        vm.set_global("_G", g);
        vm.set_global("_VERSION", LuaValue::str("Lua 5.1"));
    })
}

/// Check that argument `n` is a table
fn checktable(
    l: &mut LuaState,
    n: usize,
    fname: &str,
) -> Result<Rc<RefCell<crate::lua_value::LuaTable>>, LuaError> {
    match l.get_arg(n) {
        Some(LuaValue::Table(t)) => Ok(t),
        Some(v) => Err(l.error(format!(
            "bad argument #{} to '{}' (table expected, got {})",
            n,
            fname,
            v.type_name()
        ))),
        None => Err(l.error(format!(
            "bad argument #{} to '{}' (table expected, got no value)",
            n, fname
        ))),
    }
}

/// print(...) - Convert each argument, join with TAB, write a line
fn lua_print(l: &mut LuaState) -> LuaResult<usize> {
    let args = l.get_args();
    let mut output = String::new();
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            output.push('\t');
        }
        output.push_str(&tostring_value(arg));
    }
    println!("{}", output);
    Ok(0)
}

/// tostring(v) - The string coercion of any value
fn lua_tostring(l: &mut LuaState) -> LuaResult<usize> {
    let value = l
        .get_arg(1)
        .ok_or_else(|| l.error("bad argument #1 to 'tostring' (value expected)"))?;
    let s = tostring_value(&value);
    let result = l.create_string(&s);
    l.push_value(result)?;
    Ok(1)
}

/// tonumber(v [, base]) - Number coercion; nil when not convertible
fn lua_tonumber(l: &mut LuaState) -> LuaResult<usize> {
    let value = l
        .get_arg(1)
        .ok_or_else(|| l.error("bad argument #1 to 'tonumber' (value expected)"))?;
    let base = match l.get_arg(2) {
        None | Some(LuaValue::Nil) => None,
        Some(v) => {
            let b = v.as_number().ok_or_else(|| {
                l.error("bad argument #2 to 'tonumber' (number expected)".to_string())
            })? as i64;
            if !(2..=36).contains(&b) {
                return Err(l.error("bad argument #2 to 'tonumber' (base out of range)"));
            }
            Some(b as u32)
        }
    };
    let result = match base {
        None => value.as_number().map(LuaValue::Number),
        Some(base) => {
            let Some(s) = value.as_lua_string() else {
                return Err(l.error("bad argument #1 to 'tonumber' (string expected)"));
            };
            s.as_str().and_then(|text| {
                let t = text.trim();
                let (neg, digits) = match t.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, t.strip_prefix('+').unwrap_or(t)),
                };
                i64::from_str_radix(digits, base)
                    .ok()
                    .map(|n| LuaValue::Number(if neg { -n } else { n } as f64))
            })
        }
    };
    l.push_value(result.unwrap_or(LuaValue::Nil))?;
    Ok(1)
}

/// type(v) - Type name of a value
fn lua_type(l: &mut LuaState) -> LuaResult<usize> {
    let value = l
        .get_arg(1)
        .ok_or_else(|| l.error("bad argument #1 to 'type' (value expected)"))?;
    let name = l.create_string(value.type_name());
    l.push_value(name)?;
    Ok(1)
}

/// pairs(t) - The stateless iterator triple (next, t, nil)
fn lua_pairs(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "pairs")?;
    l.push_value(LuaValue::Function(lua_next))?;
    l.push_value(LuaValue::Table(table))?;
    l.push_value(LuaValue::Nil)?;
    Ok(3)
}

/// next(t [, k]) - Successor in the table's traversal order
fn lua_next(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "next")?;
    let key = l.get_arg(2).unwrap_or(LuaValue::Nil);
    let key_ref = if key.is_nil() { None } else { Some(&key) };
    let step = table.borrow().next(key_ref);
    match step {
        Ok(Some((k, v))) => {
            l.push_value(k)?;
            l.push_value(v)?;
            Ok(2)
        }
        Ok(None) => {
            l.push_value(LuaValue::Nil)?;
            Ok(1)
        }
        Err(()) => Err(l.error("invalid key to 'next'")),
    }
}

/// ipairs(t) - Iterate the array part, raw reads, stops at the first nil
fn lua_ipairs(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "ipairs")?;
    l.push_value(LuaValue::Function(ipairs_iter))?;
    l.push_value(LuaValue::Table(table))?;
    l.push_value(LuaValue::Number(0.0))?;
    Ok(3)
}

fn ipairs_iter(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "ipairs")?;
    let i = l.get_arg(2).and_then(|v| v.as_number()).unwrap_or(0.0) as i64 + 1;
    let value = table.borrow().raw_geti(i);
    if value.is_nil() {
        l.push_value(LuaValue::Nil)?;
        return Ok(1);
    }
    l.push_value(LuaValue::Number(i as f64))?;
    l.push_value(value)?;
    Ok(2)
}

/// select('#', ...) / select(n, ...) - Count or tail of the argument list
fn lua_select(l: &mut LuaState) -> LuaResult<usize> {
    let selector = l
        .get_arg(1)
        .ok_or_else(|| l.error("bad argument #1 to 'select' (number expected)"))?;
    let rest = l.arg_count() - 1;

    if let Some(s) = selector.as_lua_string() {
        if s.as_bytes() == b"#" {
            l.push_value(LuaValue::Number(rest as f64))?;
            return Ok(1);
        }
    }
    let n = selector
        .as_number()
        .ok_or_else(|| l.error("bad argument #1 to 'select' (number expected)"))?
        as i64;
    // negative indices count from the end
    let start = if n < 0 { rest as i64 + n + 1 } else { n };
    if start < 1 || start > rest as i64 {
        return Err(l.error("bad argument #1 to 'select' (index out of range)"));
    }
    let mut pushed = 0;
    for i in (start as usize + 1)..=(rest + 1) {
        let v = l.get_arg(i).unwrap_or(LuaValue::Nil);
        l.push_value(v)?;
        pushed += 1;
    }
    Ok(pushed)
}

/// setmetatable(t, mt) - honoring __metatable protection
fn lua_setmetatable(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "setmetatable")?;
    let meta = match l.get_arg(2) {
        Some(LuaValue::Nil) => None,
        Some(v @ LuaValue::Table(_)) => Some(v),
        _ => {
            return Err(l.error(
                "bad argument #2 to 'setmetatable' (nil or table expected)".to_string(),
            ));
        }
    };
    let current = LuaValue::Table(table.clone());
    if get_metamethod(l.vm(), &current, TmKind::Metatable).is_some() {
        return Err(l.error("cannot change a protected metatable"));
    }
    table.borrow_mut().set_metatable(meta);
    l.push_value(current)?;
    Ok(1)
}

/// getmetatable(v) - The metatable, or its __metatable mask
fn lua_getmetatable(l: &mut LuaState) -> LuaResult<usize> {
    let value = l
        .get_arg(1)
        .ok_or_else(|| l.error("bad argument #1 to 'getmetatable' (value expected)"))?;
    match get_metatable(l.vm(), &value) {
        Some(mt) => {
            if let Some(mask) = get_metamethod(l.vm(), &value, TmKind::Metatable) {
                l.push_value(mask)?;
            } else {
                l.push_value(mt)?;
            }
        }
        None => l.push_value(LuaValue::Nil)?,
    }
    Ok(1)
}

/// rawget(t, k) - Read bypassing __index
fn lua_rawget(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "rawget")?;
    let key = l.get_arg(2).unwrap_or(LuaValue::Nil);
    let value = table.borrow().raw_get(&key);
    l.push_value(value)?;
    Ok(1)
}

/// rawset(t, k, v) - Write bypassing __newindex, returns t
fn lua_rawset(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "rawset")?;
    let key = l.get_arg(2).unwrap_or(LuaValue::Nil);
    let value = l.get_arg(3).unwrap_or(LuaValue::Nil);
    table
        .borrow_mut()
        .raw_set(key, value)
        .map_err(|e| l.error(e.message()))?;
    l.push_value(LuaValue::Table(table))?;
    Ok(1)
}

/// rawequal(a, b) - Equality bypassing __eq
fn lua_rawequal(l: &mut LuaState) -> LuaResult<usize> {
    let a = l.get_arg(1).unwrap_or(LuaValue::Nil);
    let b = l.get_arg(2).unwrap_or(LuaValue::Nil);
    l.push_value(LuaValue::Boolean(a.raw_eq(&b)))?;
    Ok(1)
}

/// unpack(t [, i [, j]]) - Spread t[i..=j] as a tuple
fn lua_unpack(l: &mut LuaState) -> LuaResult<usize> {
    let table = checktable(l, 1, "unpack")?;
    let i = l.get_arg(2).and_then(|v| v.as_number()).unwrap_or(1.0) as i64;
    let j = match l.get_arg(3) {
        None | Some(LuaValue::Nil) => table.borrow().len() as i64,
        Some(v) => v
            .as_number()
            .ok_or_else(|| l.error("bad argument #3 to 'unpack' (number expected)"))?
            as i64,
    };
    let mut pushed = 0;
    for k in i..=j {
        let v = table.borrow().raw_geti(k);
        l.push_value(v)?;
        pushed += 1;
    }
    Ok(pushed)
}

/// assert(v [, message]) - Raise when v is falsy, else pass everything on
fn lua_assert(l: &mut LuaState) -> LuaResult<usize> {
    let condition = l.get_arg(1).unwrap_or(LuaValue::Nil);
    if !condition.is_truthy() {
        let message = match l.get_arg(2) {
            Some(v) => tostring_value(&v),
            None => "assertion failed!".to_string(),
        };
        return Err(l.error(message));
    }
    let args = l.get_args();
    let count = args.len();
    for v in args {
        l.push_value(v)?;
    }
    Ok(count)
}

/// error(message [, level]) - Raise a runtime error; string messages get
/// the caller's position prefix unless level is 0
fn lua_error(l: &mut LuaState) -> LuaResult<usize> {
    let value = l.get_arg(1).unwrap_or(LuaValue::Nil);
    let level = l.get_arg(2).and_then(|v| v.as_number()).unwrap_or(1.0);
    let message = tostring_value(&value);
    if matches!(value, LuaValue::String(_)) && level != 0.0 {
        Err(l.error(message))
    } else {
        Err(l.error_unprefixed(message))
    }
}
