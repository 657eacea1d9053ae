// Arithmetic, comparison, concatenation and length dispatch.
// Native operation first; unresolved operands go through the metamethod
// for the event, left operand consulted before the right.

use super::call::call_metamethod;
use super::metamethod::{TmKind, get_metamethod};
use crate::lua_value::{LuaValue, number_to_string};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    pub fn event(self) -> TmKind {
        match self {
            ArithOp::Add => TmKind::Add,
            ArithOp::Sub => TmKind::Sub,
            ArithOp::Mul => TmKind::Mul,
            ArithOp::Div => TmKind::Div,
            ArithOp::Mod => TmKind::Mod,
            ArithOp::Pow => TmKind::Pow,
            ArithOp::Unm => TmKind::Unm,
        }
    }

    /// All numbers are doubles; division by zero yields an infinity,
    /// modulo follows `a - floor(a/b)*b`.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => a - (a / b).floor() * b,
            ArithOp::Pow => a.powf(b),
            ArithOp::Unm => -a,
        }
    }
}

pub fn arith(l: &mut LuaState, op: ArithOp, b: &LuaValue, c: &LuaValue) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (b.as_number(), c.as_number()) {
        return Ok(LuaValue::Number(op.apply(x, y)));
    }
    let event = op.event();
    if let Some(handler) =
        get_metamethod(l.vm, b, event).or_else(|| get_metamethod(l.vm, c, event))
    {
        return call_metamethod(l, handler, vec![b.clone(), c.clone()]);
    }
    let offender = if b.as_number().is_none() { b } else { c };
    Err(l.error(format!(
        "attempt to perform arithmetic on a {} value",
        offender.type_name()
    )))
}

/// `==` with `__eq`: never across types, references by identity first,
/// the handler only fires when both sides agree on the same function.
pub fn values_equal(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    if a.raw_eq(b) {
        return Ok(true);
    }
    if let (LuaValue::Table(_), LuaValue::Table(_)) = (a, b) {
        let h1 = get_metamethod(l.vm, a, TmKind::Eq);
        let h2 = get_metamethod(l.vm, b, TmKind::Eq);
        if let (Some(h1), Some(h2)) = (h1, h2) {
            if h1.raw_eq(&h2) {
                let r = call_metamethod(l, h1, vec![a.clone(), b.clone()])?;
                return Ok(r.is_truthy());
            }
        }
    }
    Ok(false)
}

fn order_error(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaError {
    if a.type_name() == b.type_name() {
        l.error(format!("attempt to compare two {} values", a.type_name()))
    } else {
        l.error(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        ))
    }
}

/// Shared handler for an order event: both operands must expose the same
/// function for the event.
fn order_handler(l: &mut LuaState, a: &LuaValue, b: &LuaValue, event: TmKind) -> Option<LuaValue> {
    let h1 = get_metamethod(l.vm, a, event)?;
    let h2 = get_metamethod(l.vm, b, event)?;
    if h1.raw_eq(&h2) { Some(h1) } else { None }
}

pub fn less_than(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_bytes() < y.as_bytes()),
        _ => match order_handler(l, a, b, TmKind::Lt) {
            Some(h) => Ok(call_metamethod(l, h, vec![a.clone(), b.clone()])?.is_truthy()),
            None => Err(order_error(l, a, b)),
        },
    }
}

pub fn less_equal(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_bytes() <= y.as_bytes()),
        _ => {
            if let Some(h) = order_handler(l, a, b, TmKind::Le) {
                return Ok(call_metamethod(l, h, vec![a.clone(), b.clone()])?.is_truthy());
            }
            // a <= b falls back to not (b < a)
            if let Some(h) = order_handler(l, a, b, TmKind::Lt) {
                return Ok(!call_metamethod(l, h, vec![b.clone(), a.clone()])?.is_truthy());
            }
            Err(order_error(l, a, b))
        }
    }
}

/// Byte form of a value for concatenation, numbers decimal-formatted
fn concat_part(v: &LuaValue) -> Option<Vec<u8>> {
    match v {
        LuaValue::String(s) => Some(s.as_bytes().to_vec()),
        LuaValue::Number(n) => Some(number_to_string(*n).into_bytes()),
        _ => None,
    }
}

pub fn concat_pair(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    if let (Some(mut x), Some(y)) = (concat_part(a), concat_part(b)) {
        x.extend_from_slice(&y);
        return Ok(LuaValue::binary(x));
    }
    if let Some(handler) =
        get_metamethod(l.vm, a, TmKind::Concat).or_else(|| get_metamethod(l.vm, b, TmKind::Concat))
    {
        return call_metamethod(l, handler, vec![a.clone(), b.clone()]);
    }
    let offender = if concat_part(a).is_none() { a } else { b };
    Err(l.error(format!(
        "attempt to concatenate a {} value",
        offender.type_name()
    )))
}

pub fn length_of(l: &mut LuaState, v: &LuaValue) -> LuaResult<LuaValue> {
    match v {
        LuaValue::String(s) => Ok(LuaValue::Number(s.len() as f64)),
        LuaValue::Table(t) => {
            if let Some(handler) = get_metamethod(l.vm, v, TmKind::Len) {
                return call_metamethod(l, handler, vec![v.clone()]);
            }
            let n = t.borrow().len();
            Ok(LuaValue::Number(n as f64))
        }
        _ => Err(l.error(format!(
            "attempt to get length of a {} value",
            v.type_name()
        ))),
    }
}
