//! Trailing metadata record of a partition.
//!
//! Layout, little-endian, starting [`FOOTER_SIZE`] bytes before the end of the partition:
//!
//! | offset | size | field                  |
//! |--------|------|------------------------|
//! | 0      | 2    | application id         |
//! | 2      | 4    | application version    |
//! | 6      | 4    | verification end       |
//! | 10     | 4    | verification start     |
//! | 14     | 4    | checksum               |

use serde::{Deserialize, Serialize};

use crate::{Bootloader, Error, FlashDevice, Slot, log};

const APPLICATION_ID_SIZE: usize = 2;
const VERSION_SIZE: usize = 4;
const VERIFY_END_SIZE: usize = 4;
const VERIFY_START_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;

/// Offset of the checksum field from the start of the footer.
pub const CHECKSUM_OFFSET: usize =
    APPLICATION_ID_SIZE + VERSION_SIZE + VERIFY_END_SIZE + VERIFY_START_SIZE;

pub const FOOTER_SIZE: usize = CHECKSUM_OFFSET + CHECKSUM_SIZE;

/// Application version as stored in a footer.
///
/// Erased (`0xFFFFFFFF`) and zeroed (`0x00000000`) values carry no version.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version(pub u32);

impl Version {
    pub const fn is_valid(self) -> bool {
        self.0 != 0x0000_0000 && self.0 != 0xFFFF_FFFF
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Footer {
    /// Low byte: slot the image is downloaded into. High byte: slot it executes from.
    pub application_id: u16,
    pub version: Version,
    /// Last covered address, inclusive, relative to the primary slot.
    pub verification_end: u32,
    /// First covered address, relative to the primary slot.
    pub verification_start: u32,
    pub checksum: u32,
}

impl Footer {
    pub fn from_bytes(bytes: &[u8; FOOTER_SIZE]) -> Self {
        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };

        Footer {
            application_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            version: Version(u32_at(APPLICATION_ID_SIZE)),
            verification_end: u32_at(APPLICATION_ID_SIZE + VERSION_SIZE),
            verification_start: u32_at(APPLICATION_ID_SIZE + VERSION_SIZE + VERIFY_END_SIZE),
            checksum: u32_at(CHECKSUM_OFFSET),
        }
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut bytes = [0u8; FOOTER_SIZE];
        bytes[..APPLICATION_ID_SIZE].copy_from_slice(&self.application_id.to_le_bytes());

        let mut offset = APPLICATION_ID_SIZE;
        for field in [
            self.version.0,
            self.verification_end,
            self.verification_start,
            self.checksum,
        ] {
            bytes[offset..offset + 4].copy_from_slice(&field.to_le_bytes());
            offset += 4;
        }
        bytes
    }

    /// Slot the image was downloaded for.
    pub const fn download_target(&self) -> Slot {
        Slot(self.application_id as u8)
    }

    /// Slot the image is meant to execute from.
    pub const fn execution_target(&self) -> Slot {
        Slot((self.application_id >> 8) as u8)
    }

    /// Whether the record describes a verification range at all.
    pub const fn is_present(&self) -> bool {
        self.verification_start != 0 && self.verification_end >= self.verification_start
    }
}

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Read the footer of `slot` from flash.
    ///
    /// `slot` must be part of the layout.
    pub async fn read_footer(&mut self, slot: Slot) -> Result<Footer, Error> {
        if !self.config.contains(slot) {
            return Err(Error::InvalidArguments);
        }

        let mut bytes = [0u8; FOOTER_SIZE];
        let address = self.config.footer_address(slot);
        self.memory
            .read(address, &mut bytes)
            .await
            .inspect_err(|e| log::warn!("footer of slot {:?} unreadable: {:?}", slot.0, e))?;

        Ok(Footer::from_bytes(&bytes))
    }

    pub async fn version(&mut self, slot: Slot) -> Result<Version, Error> {
        Ok(self.read_footer(slot).await?.version)
    }

    pub async fn download_target(&mut self, slot: Slot) -> Result<Slot, Error> {
        Ok(self.read_footer(slot).await?.download_target())
    }

    pub async fn execution_target(&mut self, slot: Slot) -> Result<Slot, Error> {
        Ok(self.read_footer(slot).await?.execution_target())
    }
}
