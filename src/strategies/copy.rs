//! Strategy to copy one slot over another, completely forgetting what is in the destination.
//!
//! Used to promote a staged image into its target slot and to restore the primary slot
//! from a backup. The source is left intact, so an interrupted copy can simply be started over
//! on the next boot.

use crate::{
    Bootloader, CopyOperation, Error, FlashDevice, MemoryLocation, Page, Slot, log,
    strategies::Strategy,
};

#[derive(Clone, Copy, Debug)]
pub struct Request {
    pub from: Slot,
    pub to: Slot,
}

pub struct Copy {
    request: Request,
    num_pages: u16,
}

impl Copy {
    pub fn new(num_pages: u16, request: Request) -> Self {
        Self { request, num_pages }
    }
}

impl Strategy for Copy {
    fn plan(&self) -> impl Iterator<Item = CopyOperation> {
        (0..self.num_pages).map(Page).map(move |page| CopyOperation {
            from: MemoryLocation {
                slot: self.request.from,
                page,
            },
            to: MemoryLocation {
                slot: self.request.to,
                page,
            },
        })
    }
}

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Copy the whole partition `from` into `to`.
    ///
    /// The internal unlock keys are held for one page at a time.
    pub async fn copy_image(&mut self, from: Slot, to: Slot) -> Result<(), Error> {
        if !self.config.contains(from) || !self.config.contains(to) || from == to {
            return Err(Error::InvalidArguments);
        }
        if self.config.partition_address(to) < self.config.base_address {
            return Err(Error::InvalidArguments);
        }

        log::info!("copying slot {:?} into slot {:?}", from.0, to.0);

        let strategy = Copy::new(
            self.config.page_count(PAGE as u32),
            Request { from, to },
        );
        for operation in strategy.plan() {
            self.memory
                .unlock(D::UNLOCK_KEYS)
                .execute(&self.config, operation)
                .await
                .map_err(|e| {
                    log::error!("copy of page {:?} failed: {:?}", operation.to.page.0, e);
                    Error::CommandProcessingError
                })?;
        }

        Ok(())
    }
}
