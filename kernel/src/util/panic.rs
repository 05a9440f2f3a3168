// =============================================================================
// Relay — Kernel Panic Handler
// =============================================================================
//
// A panic in the core is a broken invariant (every `kassert!` ends here), so
// it is fatal: print where and why on the kernel console, then stop this
// core for good. The other cores keep running until they touch whatever is
// broken.
//
// Only compiled with the `panic-handler` feature: a kernel that links this
// crate usually brings its own handler.
// =============================================================================

use core::panic::PanicInfo;

use crate::arch;

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    arch::disable_interrupts();
    kprintln!();
    kprintln!("==========================================================");
    kprintln!("  KERNEL PANIC on core {}", arch::core_id());
    match info.location() {
        Some(location) => kprintln!("  Location: {}:{}", location.file(), location.line()),
        None => kprintln!("  Location: <unknown>"),
    }
    kprintln!("  Message: {}", info.message());
    kprintln!("==========================================================");
    arch::halt_forever()
}
