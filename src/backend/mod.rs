//! Hosted backend integration layer: the simulated store and its realtime fan-out.

pub mod memory;
pub mod realtime;

pub use memory::InMemoryBackend;

/// Returns the backend module name for smoke checks.
pub fn module_name() -> &'static str {
    "backend"
}
