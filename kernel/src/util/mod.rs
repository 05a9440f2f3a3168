// =============================================================================
// Relay — Kernel Utilities
// =============================================================================
//
//   logger.rs — the `log` backend and the kprint!/kprintln! macros, both
//               writing to one pluggable console
//   panic.rs  — the bare-metal panic handler (opt-in, see Cargo features)
// =============================================================================

#[macro_use]
pub mod logger;

#[cfg(all(target_os = "none", feature = "panic-handler"))]
pub mod panic;
