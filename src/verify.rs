//! Checksum verification of image slots.

use crate::{
    Bootloader, Error, FlashDevice, Slot,
    crc::Crc32,
    footer::CHECKSUM_OFFSET,
    log,
};

/// Bytes streamed through the checksum per flash read.
const CHUNK: usize = 32;

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Verify the checksum of `slot` against the reference stored in its footer.
    pub async fn verify(&mut self, slot: Slot) -> Result<(), Error> {
        if !self.config.contains(slot) {
            return Err(Error::InvalidArguments);
        }

        let footer = self.read_footer(slot).await?;
        if !footer.is_present() {
            return Err(Error::InvalidArguments);
        }

        let length = footer
            .verification_end
            .wrapping_add(1)
            .wrapping_sub(footer.verification_start);
        if length == 0 {
            return Err(Error::InvalidArguments);
        }

        // Footers address the primary slot; every other slot sits a whole number of
        // partitions above it.
        let start = footer
            .verification_start
            .checked_add(slot.0 as u32 * self.config.partition_size)
            .ok_or(Error::InvalidArguments)?;

        let reference = self.config.footer_address(slot) + CHECKSUM_OFFSET as u32;
        let result = self.validate(start, length, reference).await;

        log::debug!("slot {:?} verification: {:?}", slot.0, result);
        result
    }

    /// Compare the checksum of `[start, start + length)` against the little-endian reference at
    /// `reference`.
    async fn validate(&mut self, start: u32, length: u32, reference: u32) -> Result<(), Error> {
        let flash_size = self.memory.flash_size() as u64;
        let end = start as u64 + length as u64;

        if length == 0 || end > flash_size {
            return Err(Error::InvalidArguments);
        }

        let reference_end = reference as u64 + 4;
        let inside_range = reference_end > start as u64 && (reference as u64) < end;
        if inside_range || reference_end > flash_size {
            return Err(Error::AddressOutOfRange);
        }

        let mut crc = Crc32::new();
        let mut chunk = [0u8; CHUNK];
        let step = CHUNK.min(PAGE);
        let mut address = start as u64;
        while address < end {
            let len = step.min((end - address) as usize);
            self.memory.read(address as u32, &mut chunk[..len]).await?;
            crc.update(&chunk[..len]);
            address += len as u64;
        }

        let mut stored = [0u8; 4];
        self.memory.read(reference, &mut stored).await?;

        if crc.finish() == u32::from_le_bytes(stored) {
            Ok(())
        } else {
            Err(Error::VerificationFail)
        }
    }

    /// Verify the staging slot at the end of a transfer.
    ///
    /// With anti-rollback enabled, a valid image that does not supersede its target is reported
    /// as [`Error::RollbackFailure`].
    pub async fn verify_staged(&mut self) -> Result<(), Error> {
        let staging = self.config.staging;
        self.verify(staging).await?;

        if self.config.anti_rollback && !self.rollback_ok(staging).await {
            log::warn!("staged image rejected by rollback check");
            return Err(Error::RollbackFailure);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        footer::{FOOTER_SIZE, Footer, Version},
        mock::{self, BACKUP, CONFIG, MockFlash, PRIMARY, STAGING},
    };

    fn with_footer(slot: Slot, footer: Footer) -> MockFlash {
        let mut flash = MockFlash::new();
        let address = CONFIG.footer_address(slot) as usize;
        flash.memory[address..address + FOOTER_SIZE].copy_from_slice(&footer.to_bytes());
        flash
    }

    #[test]
    fn valid_image_passes_in_every_slot() {
        let mut flash = MockFlash::new();
        for slot in [PRIMARY, STAGING, BACKUP] {
            flash.install(slot, &mock::image(1, PRIMARY, slot.0));
        }
        let mut bootloader = mock::bootloader(flash);

        embassy_futures::block_on(async {
            for slot in [PRIMARY, STAGING, BACKUP] {
                assert_eq!(bootloader.verify(slot).await, Ok(()));
            }
        });
    }

    #[test]
    fn any_flipped_bit_fails() {
        let image = mock::image(1, PRIMARY, 0x5a);
        let base = CONFIG.partition_address(STAGING);
        let covered = CONFIG.partition_size - FOOTER_SIZE as u32 + CHECKSUM_OFFSET as u32;

        for (offset, bit) in [(0, 0), (1, 7), (0x1ff, 3), (covered - 1, 5)] {
            let mut flash = MockFlash::new();
            flash.install(STAGING, &image);
            flash.flip_bit(base + offset, bit);
            let mut bootloader = mock::bootloader(flash);

            embassy_futures::block_on(async {
                let result = bootloader.verify(STAGING).await;
                if offset == covered - 1 {
                    // Last byte of the footer's start address; still covered by the checksum.
                    assert!(result.is_err());
                } else {
                    assert_eq!(result, Err(Error::VerificationFail));
                }
            });
        }
    }

    #[test]
    fn flipped_checksum_fails() {
        let mut flash = MockFlash::new();
        flash.install(PRIMARY, &mock::image(1, PRIMARY, 0));
        flash.flip_bit(CONFIG.footer_address(PRIMARY) + CHECKSUM_OFFSET as u32 + 3, 7);
        let mut bootloader = mock::bootloader(flash);

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify(PRIMARY).await, Err(Error::VerificationFail));
        });
    }

    #[test]
    fn checksum_inside_range_is_rejected() {
        // The range covers the whole partition, including the checksum itself.
        let footer = Footer {
            application_id: 0,
            version: Version(1),
            verification_start: CONFIG.base_address,
            verification_end: CONFIG.base_address + CONFIG.partition_size - 1,
            checksum: 0,
        };
        let mut bootloader = mock::bootloader(with_footer(PRIMARY, footer));

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify(PRIMARY).await, Err(Error::AddressOutOfRange));
        });

        // Overlapping only the first byte of the checksum is enough.
        let footer = Footer {
            verification_end: CONFIG.footer_address(PRIMARY) + CHECKSUM_OFFSET as u32,
            ..footer
        };
        let mut bootloader = mock::bootloader(with_footer(PRIMARY, footer));

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify(PRIMARY).await, Err(Error::AddressOutOfRange));
        });
    }

    #[test]
    fn missing_footer() {
        let mut bootloader = mock::bootloader(MockFlash::new());

        embassy_futures::block_on(async {
            // Erased footers describe a range past the end of flash.
            assert_eq!(bootloader.verify(PRIMARY).await, Err(Error::InvalidArguments));
            assert_eq!(bootloader.verify(Slot(3)).await, Err(Error::InvalidArguments));
        });

        let zero_start = Footer {
            application_id: 0,
            version: Version(1),
            verification_start: 0,
            verification_end: 0x100,
            checksum: 0,
        };
        let mut bootloader = mock::bootloader(with_footer(STAGING, zero_start));

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify(STAGING).await, Err(Error::InvalidArguments));
        });
    }

    #[test]
    fn staged_image_rollback() {
        let mut flash = MockFlash::new();
        flash.install(PRIMARY, &mock::image(5, PRIMARY, 0x01));
        flash.install(STAGING, &mock::image(5, PRIMARY, 0x02));
        let mut bootloader = mock::bootloader(flash);

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify_staged().await, Err(Error::RollbackFailure));
        });

        let mut flash = bootloader.into_device();
        flash.install(STAGING, &mock::image(6, PRIMARY, 0x02));
        let mut bootloader = mock::bootloader(flash);

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify_staged().await, Ok(()));
        });

        let mut flash = bootloader.into_device();
        flash.install(STAGING, &mock::image(2, PRIMARY, 0x02));
        let config = crate::Config {
            anti_rollback: false,
            ..CONFIG
        };
        let mut bootloader = mock::bootloader_with(flash, config);

        embassy_futures::block_on(async {
            assert_eq!(bootloader.verify_staged().await, Ok(()));
        });
    }
}
