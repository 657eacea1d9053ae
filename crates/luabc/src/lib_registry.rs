// Library registration system for the host-provided globals
// Modules declare name -> function/value entries; the registry installs
// them into a VM's global table.

use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::{CFunction, LuaVM};
use std::cell::RefCell;
use std::rc::Rc;

/// Creates a value when the module loads (constants like `math.pi`)
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

/// Runs after a module's table is installed (extra wiring like the
/// shared string metatable)
pub type ModuleInitializer = fn(&mut LuaVM, &LuaValue);

pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

/// A library module: named functions and values, plus optional wiring
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
    pub initializer: Option<ModuleInitializer>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            initializer: None,
        }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }

    pub fn with_initializer(mut self, init: ModuleInitializer) -> Self {
        self.initializer = Some(init);
        self
    }
}

/// Builder for library modules
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Registry of library modules, loaded in insertion order
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &mut LuaVM) {
        for module in &self.modules {
            self.load_module(vm, module);
        }
    }

    pub fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) {
        if module.name == "_G" {
            // base functions live directly in the global table
            for (name, entry) in &module.entries {
                let value = Self::entry_value(vm, entry);
                vm.set_global(name, value);
            }
            if let Some(init) = module.initializer {
                let globals = vm.globals_value();
                init(vm, &globals);
            }
            return;
        }

        let table = Rc::new(RefCell::new(LuaTable::new(0, module.entries.len())));
        for (name, entry) in &module.entries {
            let value = Self::entry_value(vm, entry);
            // string keys are never rejected
            let _ = table.borrow_mut().raw_set(LuaValue::str(name), value);
        }
        let lib_value = LuaValue::Table(table);
        vm.set_global(module.name, lib_value.clone());
        if let Some(init) = module.initializer {
            init(vm, &lib_value);
        }
    }

    fn entry_value(vm: &mut LuaVM, entry: &LibraryEntry) -> LuaValue {
        match entry {
            LibraryEntry::Function(func) => LuaValue::Function(*func),
            LibraryEntry::Value(value_init) => value_init(vm),
        }
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
