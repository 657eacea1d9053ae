// Host-provided standard globals

pub mod basic;
pub mod coroutine;
pub mod math;
pub mod string;

use crate::lib_registry::LibraryRegistry;

/// The core library set: base functions plus math, string and coroutine
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(basic::create_basic_lib());
    registry.register(math::create_math_lib());
    registry.register(string::create_string_lib());
    registry.register(coroutine::create_coroutine_lib());
    registry
}
