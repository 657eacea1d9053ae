// Math library
// Implements: abs, acos, asin, atan, ceil, cos, deg, exp, floor, fmod,
// log, max, min, modf, rad, random, randomseed, sin, sqrt, tan, pi, huge

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// Check that argument `n` is a number, with the standard message
fn checknumber(l: &mut LuaState, n: usize, fname: &str) -> Result<f64, LuaError> {
    let Some(v) = l.get_arg(n) else {
        return Err(l.error(format!(
            "bad argument #{} to '{}' (number expected, got no value)",
            n, fname
        )));
    };
    if let Some(f) = v.as_number() {
        return Ok(f);
    }
    Err(l.error(format!(
        "bad argument #{} to '{}' (number expected, got {})",
        n,
        fname,
        v.type_name()
    )))
}

pub fn create_math_lib() -> LibraryModule {
    let mut module = crate::lib_module!("math", {
        "abs" => math_abs,
        "acos" => math_acos,
        "asin" => math_asin,
        "atan" => math_atan,
        "ceil" => math_ceil,
        "cos" => math_cos,
        "deg" => math_deg,
        "exp" => math_exp,
        "floor" => math_floor,
        "fmod" => math_fmod,
        "log" => math_log,
        "max" => math_max,
        "min" => math_min,
        "modf" => math_modf,
        "rad" => math_rad,
        "random" => math_random,
        "randomseed" => math_randomseed,
        "sin" => math_sin,
        "sqrt" => math_sqrt,
        "tan" => math_tan,
    });

    // plain number constants
    module = module.with_value("pi", |_vm| LuaValue::Number(std::f64::consts::PI));
    module = module.with_value("huge", |_vm| LuaValue::Number(f64::INFINITY));

    module
}

macro_rules! unary_math {
    ($name:ident, $fname:expr, $op:expr) => {
        fn $name(l: &mut LuaState) -> LuaResult<usize> {
            let x = checknumber(l, 1, $fname)?;
            let f: fn(f64) -> f64 = $op;
            l.push_value(LuaValue::Number(f(x)))?;
            Ok(1)
        }
    };
}

unary_math!(math_abs, "abs", |x| x.abs());
unary_math!(math_acos, "acos", |x| x.acos());
unary_math!(math_asin, "asin", |x| x.asin());
unary_math!(math_atan, "atan", |x| x.atan());
unary_math!(math_ceil, "ceil", |x| x.ceil());
unary_math!(math_cos, "cos", |x| x.cos());
unary_math!(math_deg, "deg", |x| x.to_degrees());
unary_math!(math_exp, "exp", |x| x.exp());
unary_math!(math_floor, "floor", |x| x.floor());
unary_math!(math_log, "log", |x| x.ln());
unary_math!(math_rad, "rad", |x| x.to_radians());
unary_math!(math_sin, "sin", |x| x.sin());
unary_math!(math_sqrt, "sqrt", |x| x.sqrt());
unary_math!(math_tan, "tan", |x| x.tan());

fn math_fmod(l: &mut LuaState) -> LuaResult<usize> {
    let a = checknumber(l, 1, "fmod")?;
    let b = checknumber(l, 2, "fmod")?;
    l.push_value(LuaValue::Number(a % b))?;
    Ok(1)
}

/// modf(x) - integral part (truncated toward zero) and fraction
fn math_modf(l: &mut LuaState) -> LuaResult<usize> {
    let x = checknumber(l, 1, "modf")?;
    l.push_value(LuaValue::Number(x.trunc()))?;
    l.push_value(LuaValue::Number(x.fract()))?;
    Ok(2)
}

fn math_max(l: &mut LuaState) -> LuaResult<usize> {
    let mut best = checknumber(l, 1, "max")?;
    for n in 2..=l.arg_count() {
        let x = checknumber(l, n, "max")?;
        if x > best {
            best = x;
        }
    }
    l.push_value(LuaValue::Number(best))?;
    Ok(1)
}

fn math_min(l: &mut LuaState) -> LuaResult<usize> {
    let mut best = checknumber(l, 1, "min")?;
    for n in 2..=l.arg_count() {
        let x = checknumber(l, n, "min")?;
        if x < best {
            best = x;
        }
    }
    l.push_value(LuaValue::Number(best))?;
    Ok(1)
}

/// random() in [0,1); random(m) in [1,m]; random(m,n) in [m,n]
fn math_random(l: &mut LuaState) -> LuaResult<usize> {
    let result = match l.arg_count() {
        0 => LuaValue::Number(l.vm_mut().rng.next_float()),
        1 => {
            let m = checknumber(l, 1, "random")? as i64;
            if m < 1 {
                return Err(l.error("bad argument #1 to 'random' (interval is empty)"));
            }
            LuaValue::Number(l.vm_mut().rng.next_range(1, m) as f64)
        }
        _ => {
            let m = checknumber(l, 1, "random")? as i64;
            let n = checknumber(l, 2, "random")? as i64;
            if m > n {
                return Err(l.error("bad argument #2 to 'random' (interval is empty)"));
            }
            LuaValue::Number(l.vm_mut().rng.next_range(m, n) as f64)
        }
    };
    l.push_value(result)?;
    Ok(1)
}

fn math_randomseed(l: &mut LuaState) -> LuaResult<usize> {
    let seed = checknumber(l, 1, "randomseed")?;
    l.vm_mut().rng = crate::lua_vm::LuaRng::seeded(seed.to_bits(), 0);
    Ok(0)
}
