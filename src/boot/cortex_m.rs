use crate::boot::Boot;

/// Jump into an image on Cortex-M without TrustZone.
///
/// Loads the stack pointer and reset vector from the vector table at the start of the
/// primary slot.
pub struct CortexM;

impl Boot for CortexM {
    unsafe fn boot(addr: *const u32) -> ! {
        unsafe { cortex_m::asm::bootload(addr) }
    }
}
