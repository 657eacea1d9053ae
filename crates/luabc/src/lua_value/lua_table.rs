// LuaTable - hybrid array + hash table
// The hash part keeps a first-insertion key log so `next` has a stable order

use super::{LuaString, LuaValue};
use ahash::AHashMap;
use std::rc::Rc;

/// Rejected raw-set keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKeyError {
    NilIndex,
    NanIndex,
}

impl TableKeyError {
    pub fn message(self) -> &'static str {
        match self {
            TableKeyError::NilIndex => "table index is nil",
            TableKeyError::NanIndex => "table index is NaN",
        }
    }
}

/// Hashable key form of a LuaValue. Strings hash by content, reference
/// values by identity; number keys are normalized f64 bits (-0 folds to 0).
#[derive(Clone, PartialEq, Eq, Hash)]
enum LuaKey {
    Boolean(bool),
    Number(u64),
    Str(Rc<LuaString>),
    Ref(usize),
}

impl LuaKey {
    fn number(n: f64) -> LuaKey {
        let n = if n == 0.0 { 0.0 } else { n };
        LuaKey::Number(n.to_bits())
    }

    fn of(v: &LuaValue) -> Result<LuaKey, TableKeyError> {
        match v {
            LuaValue::Nil => Err(TableKeyError::NilIndex),
            LuaValue::Boolean(b) => Ok(LuaKey::Boolean(*b)),
            LuaValue::Number(n) if n.is_nan() => Err(TableKeyError::NanIndex),
            LuaValue::Number(n) => Ok(LuaKey::number(*n)),
            LuaValue::String(s) => Ok(LuaKey::Str(s.clone())),
            other => Ok(LuaKey::Ref(other.identity_addr().unwrap())),
        }
    }
}

pub struct LuaTable {
    /// Dense part, key `i+1` at slot `i`
    array: Vec<LuaValue>,
    /// Key -> slot in `entries`
    hash: AHashMap<LuaKey, usize>,
    /// Insertion-ordered key/value log; removed keys leave a tombstone
    entries: Vec<Option<(LuaValue, LuaValue)>>,
    /// Always a `LuaValue::Table` when present
    meta: Option<LuaValue>,
}

impl LuaTable {
    pub fn new(array_capacity: usize, hash_capacity: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(array_capacity),
            hash: AHashMap::with_capacity(hash_capacity),
            entries: Vec::with_capacity(hash_capacity),
            meta: None,
        }
    }

    pub fn metatable(&self) -> Option<LuaValue> {
        self.meta.clone()
    }

    pub fn set_metatable(&mut self, meta: Option<LuaValue>) {
        self.meta = meta;
    }

    /// Array-part slot of a numeric key currently stored there
    fn array_slot(&self, n: f64) -> Option<usize> {
        if n >= 1.0 && n.fract() == 0.0 && n <= self.array.len() as f64 {
            Some(n as usize - 1)
        } else {
            None
        }
    }

    /// Raw read, no metamethods
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        if let LuaValue::Number(n) = key {
            if let Some(slot) = self.array_slot(*n) {
                return self.array[slot].clone();
            }
        }
        let Ok(k) = LuaKey::of(key) else {
            return LuaValue::Nil;
        };
        match self.hash.get(&k) {
            Some(&pos) => match &self.entries[pos] {
                Some((_, v)) => v.clone(),
                None => LuaValue::Nil,
            },
            None => LuaValue::Nil,
        }
    }

    #[inline]
    pub fn raw_geti(&self, key: i64) -> LuaValue {
        if key >= 1 && (key as usize) <= self.array.len() {
            return self.array[key as usize - 1].clone();
        }
        self.raw_get(&LuaValue::Number(key as f64))
    }

    /// Raw write, no metamethods. Assigning nil removes the key.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableKeyError> {
        if let LuaValue::Number(n) = key {
            if let Some(slot) = self.array_slot(n) {
                // nil writes keep the slot so traversal from this key stays valid
                self.array[slot] = value;
                return Ok(());
            }
            // append just past the dense boundary
            if !value.is_nil() && n == (self.array.len() + 1) as f64 {
                self.array.push(value);
                self.migrate_from_hash();
                return Ok(());
            }
        }
        let k = LuaKey::of(&key)?;
        if value.is_nil() {
            // tombstone: the position stays known so `next` can resume here
            if let Some(&pos) = self.hash.get(&k) {
                self.entries[pos] = None;
            }
            return Ok(());
        }
        match self.hash.get(&k) {
            Some(&pos) => {
                self.entries[pos] = Some((key, value));
            }
            None => {
                self.entries.push(Some((key, value)));
                self.hash.insert(k, self.entries.len() - 1);
            }
        }
        Ok(())
    }

    #[inline]
    pub fn raw_seti(&mut self, key: i64, value: LuaValue) {
        // integer keys are never nil or NaN
        let _ = self.raw_set(LuaValue::Number(key as f64), value);
    }

    /// Pull keys that became dense out of the hash part
    fn migrate_from_hash(&mut self) {
        loop {
            let next = LuaKey::number((self.array.len() + 1) as f64);
            // a tombstoned mapping is not part of the border
            let Some(&pos) = self.hash.get(&next) else {
                break;
            };
            let Some((_, v)) = self.entries[pos].take() else {
                break;
            };
            self.hash.remove(&next);
            self.array.push(v);
        }
    }

    /// The `#` border: `t[n] ~= nil` and `t[n+1] == nil`
    pub fn len(&self) -> usize {
        let mut n = self.array.len();
        while n > 0 && self.array[n - 1].is_nil() {
            n -= 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.entries.iter().all(|e| e.is_none())
    }

    /// Successor of `key` in traversal order: array part first, then the
    /// hash part in first-insertion order. `None` key starts from the
    /// beginning; `Err` means the key was never in the table.
    pub fn next(&self, key: Option<&LuaValue>) -> Result<Option<(LuaValue, LuaValue)>, ()> {
        let start = match key {
            None => 0,
            Some(k) => {
                if let LuaValue::Number(n) = k {
                    if let Some(slot) = self.array_slot(*n) {
                        return Ok(self.advance(slot + 1, 0));
                    }
                }
                let hk = LuaKey::of(k).map_err(|_| ())?;
                let pos = *self.hash.get(&hk).ok_or(())?;
                return Ok(self.advance(self.array.len(), pos + 1));
            }
        };
        Ok(self.advance(start, 0))
    }

    fn advance(&self, array_from: usize, entry_from: usize) -> Option<(LuaValue, LuaValue)> {
        for i in array_from..self.array.len() {
            if !self.array[i].is_nil() {
                return Some((LuaValue::Number((i + 1) as f64), self.array[i].clone()));
            }
        }
        for entry in self.entries.iter().skip(entry_from) {
            if let Some((k, v)) = entry {
                return Some((k.clone(), v.clone()));
            }
        }
        None
    }
}
