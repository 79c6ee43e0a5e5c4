//! Plugin modules compiled into the wrapper.

use bladebar_plugin::ModuleRegistry;
use clock_plugin::ClockModule;
use separator_plugin::SeparatorModule;

/// Registry of every built-in module, keyed by module name.
pub fn builtin_modules() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(ClockModule).register(SeparatorModule);
    registry
}
