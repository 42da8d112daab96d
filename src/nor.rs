//! [`FlashDevice`] over any asynchronous NOR flash driver.
//!
//! For byte-addressed targets whose memory controller has no unlock sequence: the expected key
//! set is [`UnlockKeys::NONE`] and keys handed to the device are not looked at.

use embedded_storage_async::nor_flash::NorFlash;

use crate::{Error, FlashDevice, UnlockKeys, log};

pub struct NorFlashDevice<F: NorFlash> {
    flash: F,
    device_id: u32,
    size: u32,
}

impl<F: NorFlash> NorFlashDevice<F> {
    /// `device_id` is reported for every device id address, as NOR drivers have no notion of it.
    ///
    /// Fails with [`Error::InvalidArguments`] for a flash too large for 32-bit addresses.
    pub fn new(flash: F, device_id: u32) -> Result<Self, Error> {
        const {
            assert!(F::READ_SIZE == 1, "reads must be byte granular");
            assert!(F::ERASE_SIZE % F::WRITE_SIZE == 0);
        };

        let size = u32::try_from(flash.capacity()).map_err(|_| {
            log::error!("nor capacity exceeds the address space");
            Error::InvalidArguments
        })?;

        Ok(Self {
            flash,
            device_id,
            size,
        })
    }

    pub fn release(self) -> F {
        self.flash
    }
}

impl<F: NorFlash> FlashDevice for NorFlashDevice<F> {
    const PAGE_SIZE: usize = F::ERASE_SIZE;
    const UNLOCK_KEYS: UnlockKeys = UnlockKeys::NONE;

    fn flash_size(&self) -> u32 {
        self.size
    }

    async fn read(&mut self, address: u32, buf: &mut [u8], _key: u16) -> Result<(), Error> {
        self.flash.read(address, buf).await.map_err(|_| {
            log::error!("nor read at {:#x} failed", address);
            Error::Fail
        })
    }

    async fn erase_page(&mut self, address: u32, _key: u16) -> Result<(), Error> {
        self.flash
            .erase(address, address + F::ERASE_SIZE as u32)
            .await
            .map_err(|_| {
                log::error!("nor erase at {:#x} failed", address);
                Error::Fail
            })
    }

    async fn program_page(&mut self, address: u32, data: &[u8], _key: u16) -> Result<(), Error> {
        self.flash.write(address, data).await.map_err(|_| {
            log::error!("nor write at {:#x} failed", address);
            Error::Fail
        })
    }

    async fn read_device_id(&mut self, _address: u32) -> Result<u32, Error> {
        Ok(self.device_id)
    }
}
