//! Compile-time description of the partition layout and the update policy of a target.

use crate::{Error, Slot};

/// Version of the update image file format.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Layout and policy of a target, usually declared as a `const` by the integrator.
///
/// ```
/// use stageboot::{Config, Slot, config::FormatVersion};
///
/// const CONFIG: Config = Config {
///     base_address: 0x2000,
///     partition_size: 0x1000,
///     partition_count: 2,
///     staging: Slot::new(1),
///     backup: None,
///     anti_rollback: true,
///     device_id_address: 0x8006,
///     max_payload_size: 64,
///     format_version: FormatVersion { major: 0, minor: 3, patch: 0 },
/// };
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Config {
    /// Start of the primary partition. All other partitions follow it back to back.
    pub base_address: u32,
    pub partition_size: u32,
    pub partition_count: u8,
    /// Partition receiving incoming updates.
    pub staging: Slot,
    /// Partition holding a last-known-good image, if restoration from backup is enabled.
    pub backup: Option<Slot>,
    pub anti_rollback: bool,
    /// Location of the hardware device identifier.
    pub device_id_address: u32,
    /// Largest payload a single write command may carry.
    pub max_payload_size: u16,
    /// Image format this core understands.
    pub format_version: FormatVersion,
}

impl Config {
    /// Start address of a partition, or 0 if `slot` is not configured.
    ///
    /// Callers are expected to bounds-check `slot` first. Addresses are only meaningful for a
    /// layout that passed [`Config::validate`]; any other layout yields wrapped addresses rather
    /// than a panic.
    pub const fn partition_address(&self, slot: Slot) -> u32 {
        if slot.0 < self.partition_count {
            self.base_address
                .wrapping_add(self.partition_size.wrapping_mul(slot.0 as u32))
        } else {
            0
        }
    }

    /// Start address of the footer of a partition, or 0 if `slot` is not configured.
    pub const fn footer_address(&self, slot: Slot) -> u32 {
        if slot.0 < self.partition_count {
            self.partition_address(slot)
                .wrapping_add(self.partition_size)
                .wrapping_sub(crate::footer::FOOTER_SIZE as u32)
        } else {
            0
        }
    }

    pub const fn contains(&self, slot: Slot) -> bool {
        slot.0 < self.partition_count
    }

    /// Number of pages in a single partition.
    pub const fn page_count(&self, page_size: u32) -> u16 {
        match self.partition_size.checked_div(page_size) {
            Some(pages) => pages as u16,
            None => 0,
        }
    }

    /// Check the layout preconditions the rest of the core relies on.
    ///
    /// Verification re-bases the start address stored in a footer by `slot * partition_size`,
    /// which only holds when partitions are uniform, page-aligned and the primary comes first.
    pub fn validate(&self, flash_size: u32, page_size: u32) -> Result<(), Error> {
        if page_size == 0
            || self.partition_size == 0
            || self.partition_size % page_size != 0
            || self.base_address % page_size != 0
            || (self.partition_size as usize) < crate::footer::FOOTER_SIZE
        {
            return Err(Error::InvalidArguments);
        }

        if self.partition_count < 2 || self.partition_size / page_size > u16::MAX as u32 {
            return Err(Error::InvalidArguments);
        }

        let end = (self.partition_size as u64) * (self.partition_count as u64)
            + self.base_address as u64;
        if end > flash_size as u64 {
            return Err(Error::InvalidArguments);
        }

        if !self.contains(self.staging) || self.staging == Slot::PRIMARY {
            return Err(Error::InvalidArguments);
        }

        if let Some(backup) = self.backup {
            if !self.contains(backup) || backup == Slot::PRIMARY || backup == self.staging {
                return Err(Error::InvalidArguments);
            }
        }

        if self.max_payload_size == 0 || self.max_payload_size as u32 > page_size {
            return Err(Error::InvalidArguments);
        }

        Ok(())
    }
}
