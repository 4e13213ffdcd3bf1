//! Native function implementations for the Magpie runtime.

pub mod core;
pub mod io;

use magpie_vm::NativeRegistry;

/// Register all native functions.
pub fn register_all(registry: &mut NativeRegistry) {
    core::register(registry);
    io::register(registry);
}
