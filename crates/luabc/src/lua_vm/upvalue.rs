// Up-value cells
// Open cells alias a live frame's register vector; closing copies the
// value in. Closures that captured the same slot hold the same cell.

use crate::lua_value::LuaValue;
use std::cell::RefCell;
use std::rc::Rc;

pub enum Upvalue {
    Open {
        regs: Rc<RefCell<Vec<LuaValue>>>,
        index: usize,
    },
    Closed(LuaValue),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

impl Upvalue {
    pub fn open(regs: Rc<RefCell<Vec<LuaValue>>>, index: usize) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Open { regs, index }))
    }

    pub fn closed(value: LuaValue) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Closed(value)))
    }

    pub fn get(cell: &UpvalueRef) -> LuaValue {
        match &*cell.borrow() {
            Upvalue::Open { regs, index } => regs.borrow()[*index].clone(),
            Upvalue::Closed(v) => v.clone(),
        }
    }

    pub fn set(cell: &UpvalueRef, value: LuaValue) {
        match &mut *cell.borrow_mut() {
            Upvalue::Open { regs, index } => regs.borrow_mut()[*index] = value,
            Upvalue::Closed(slot) => *slot = value,
        }
    }

    /// One-way open -> closed transition
    pub fn close(cell: &UpvalueRef) {
        let value = Upvalue::get(cell);
        *cell.borrow_mut() = Upvalue::Closed(value);
    }
}
