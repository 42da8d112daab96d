use crate::{
    Bootloader, Error, FlashDevice, Slot, log,
    state::{BootReport, BootState},
};

#[cfg(feature = "cortex_m")]
pub mod cortex_m;

/// Hands control to the promoted image once the boot decision selected it.
pub trait Boot {
    /// `addr` is the start of the primary partition, where the image keeps its vector table.
    /// Control never comes back.
    unsafe fn boot(addr: *const u32) -> !;
}

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Jump into the primary image if the boot decision allows it.
    ///
    /// Only returns, with [`Error::InvalidArguments`], when `report` does not select the
    /// application.
    ///
    /// # Safety
    /// The primary slot must start with a vector table the target can execute from, and all
    /// peripherals used by the bootloader must have been released.
    pub unsafe fn start_application<B: Boot>(&self, report: &BootReport) -> Error {
        if report.state != BootState::Application {
            log::warn!("refusing to start application in {:?}", report.state);
            return Error::InvalidArguments;
        }

        let address = self.config.partition_address(Slot::PRIMARY);
        log::info!("starting application at {:#x}", address);
        unsafe { B::boot(address as usize as *const u32) }
    }
}
