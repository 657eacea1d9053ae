// String library (byte-level core)
// Implements: sub, len, upper, lower, rep, reverse, byte, char.
// Loading it also installs the shared string metatable with
// __index = string, so s:sub(...) method calls resolve.

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaTable, LuaValue, number_to_string};
use crate::lua_vm::{LuaError, LuaResult, LuaState};
use std::cell::RefCell;
use std::rc::Rc;

pub fn create_string_lib() -> LibraryModule {
    crate::lib_module!("string", {
        "sub" => string_sub,
        "len" => string_len,
        "upper" => string_upper,
        "lower" => string_lower,
        "rep" => string_rep,
        "reverse" => string_reverse,
        "byte" => string_byte,
        "char" => string_char,
    })
    .with_initializer(|vm, lib| {
        let meta = Rc::new(RefCell::new(LuaTable::new(0, 1)));
        let _ = meta
            .borrow_mut()
            .raw_set(LuaValue::str("__index"), lib.clone());
        vm.set_string_metatable(LuaValue::Table(meta));
    })
}

/// Check that argument `n` is a string, applying the number coercion
fn checkstring(l: &mut LuaState, n: usize, fname: &str) -> Result<Vec<u8>, LuaError> {
    match l.get_arg(n) {
        Some(LuaValue::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(LuaValue::Number(x)) => Ok(number_to_string(x).into_bytes()),
        Some(v) => Err(l.error(format!(
            "bad argument #{} to '{}' (string expected, got {})",
            n,
            fname,
            v.type_name()
        ))),
        None => Err(l.error(format!(
            "bad argument #{} to '{}' (string expected, got no value)",
            n, fname
        ))),
    }
}

/// Translate a possibly-negative position to 1-based, Lua style
fn posrelat(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if -pos > len as i64 {
        0
    } else {
        len as i64 + pos + 1
    }
}

fn string_sub(l: &mut LuaState) -> LuaResult<usize> {
    let s = checkstring(l, 1, "sub")?;
    let len = s.len();
    let i = l.get_arg(2).and_then(|v| v.as_number()).unwrap_or(1.0) as i64;
    let j = match l.get_arg(3) {
        None | Some(LuaValue::Nil) => -1,
        Some(v) => v
            .as_number()
            .ok_or_else(|| l.error("bad argument #3 to 'sub' (number expected)"))?
            as i64,
    };
    let mut i = posrelat(i, len);
    let mut j = posrelat(j, len);
    if i < 1 {
        i = 1;
    }
    if j > len as i64 {
        j = len as i64;
    }
    let result = if i <= j {
        LuaValue::binary(s[i as usize - 1..j as usize].to_vec())
    } else {
        LuaValue::str("")
    };
    l.push_value(result)?;
    Ok(1)
}

fn string_len(l: &mut LuaState) -> LuaResult<usize> {
    let s = checkstring(l, 1, "len")?;
    l.push_value(LuaValue::Number(s.len() as f64))?;
    Ok(1)
}

fn string_upper(l: &mut LuaState) -> LuaResult<usize> {
    let mut s = checkstring(l, 1, "upper")?;
    s.make_ascii_uppercase();
    l.push_value(LuaValue::binary(s))?;
    Ok(1)
}

fn string_lower(l: &mut LuaState) -> LuaResult<usize> {
    let mut s = checkstring(l, 1, "lower")?;
    s.make_ascii_lowercase();
    l.push_value(LuaValue::binary(s))?;
    Ok(1)
}

fn string_rep(l: &mut LuaState) -> LuaResult<usize> {
    let s = checkstring(l, 1, "rep")?;
    let n = l
        .get_arg(2)
        .and_then(|v| v.as_number())
        .ok_or_else(|| l.error("bad argument #2 to 'rep' (number expected)"))? as i64;
    let result = if n > 0 {
        s.repeat(n as usize)
    } else {
        Vec::new()
    };
    l.push_value(LuaValue::binary(result))?;
    Ok(1)
}

fn string_reverse(l: &mut LuaState) -> LuaResult<usize> {
    let mut s = checkstring(l, 1, "reverse")?;
    s.reverse();
    l.push_value(LuaValue::binary(s))?;
    Ok(1)
}

/// byte(s [, i [, j]]) - numeric codes of the bytes in s[i..=j]
fn string_byte(l: &mut LuaState) -> LuaResult<usize> {
    let s = checkstring(l, 1, "byte")?;
    let len = s.len();
    let i = l.get_arg(2).and_then(|v| v.as_number()).unwrap_or(1.0) as i64;
    let j = match l.get_arg(3) {
        None | Some(LuaValue::Nil) => i,
        Some(v) => v
            .as_number()
            .ok_or_else(|| l.error("bad argument #3 to 'byte' (number expected)"))?
            as i64,
    };
    let mut i = posrelat(i, len);
    let mut j = posrelat(j, len);
    if i < 1 {
        i = 1;
    }
    if j > len as i64 {
        j = len as i64;
    }
    let mut pushed = 0;
    for k in i..=j {
        l.push_value(LuaValue::Number(s[k as usize - 1] as f64))?;
        pushed += 1;
    }
    Ok(pushed)
}

/// char(...) - string from numeric byte codes
fn string_char(l: &mut LuaState) -> LuaResult<usize> {
    let mut bytes = Vec::with_capacity(l.arg_count());
    for n in 1..=l.arg_count() {
        let code = l
            .get_arg(n)
            .and_then(|v| v.as_number())
            .ok_or_else(|| {
                l.error(format!("bad argument #{} to 'char' (number expected)", n))
            })?;
        if !(0.0..=255.0).contains(&code) || code.fract() != 0.0 {
            return Err(l.error(format!("bad argument #{} to 'char' (invalid value)", n)));
        }
        bytes.push(code as u8);
    }
    l.push_value(LuaValue::binary(bytes))?;
    Ok(1)
}
