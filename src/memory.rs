//! Safe primitives over raw program memory.
//!
//! Flash is only programmable a full page at a time, so every write merges the caller's bytes
//! with the current contents of the page in a scratch buffer before erasing and reprogramming it.
//! Destructive operations are only accepted while an [`Unlocked`] guard is alive; dropping the
//! guard clears the keys, whichever way the operation ended.

use core::ops::{Deref, DerefMut};

use crate::{Config, CopyOperation, Error, FlashDevice, MemoryLocation, UnlockKeys, log};

pub struct Memory<D: FlashDevice, const PAGE: usize> {
    device: D,
    /// Merge buffer for read-modify-write. Never handed out.
    scratch: [u8; PAGE],
    keys: Option<UnlockKeys>,
}

impl<D: FlashDevice, const PAGE: usize> Memory<D, PAGE> {
    pub fn new(device: D) -> Self {
        const { assert!(PAGE == D::PAGE_SIZE, "scratch buffer must span exactly one page") };

        Self {
            device,
            scratch: [0xff; PAGE],
            keys: None,
        }
    }

    pub fn flash_size(&self) -> u32 {
        self.device.flash_size()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Whether an unlock key set is currently held.
    pub fn is_unlocked(&self) -> bool {
        self.keys.is_some()
    }

    /// Hold `keys` for as long as the returned guard lives.
    pub(crate) fn unlock(&mut self, keys: UnlockKeys) -> Unlocked<'_, D, PAGE> {
        self.keys = Some(keys);
        Unlocked { memory: self }
    }

    fn held_keys(&self) -> Result<UnlockKeys, Error> {
        self.keys.ok_or_else(|| {
            log::error!("destructive memory operation without unlock keys");
            Error::Fail
        })
    }

    const fn page_start(address: u32) -> u32 {
        address - address % PAGE as u32
    }

    const fn page_offset(address: u32) -> usize {
        (address % PAGE as u32) as usize
    }

    /// Single transfer of at most one page, entirely inside flash.
    fn check_transfer(&self, address: u32, len: usize) -> Result<(), Error> {
        if len == 0 || len > PAGE {
            return Err(Error::InvalidArguments);
        }
        if address as u64 + len as u64 > self.flash_size() as u64 {
            return Err(Error::InvalidArguments);
        }
        Ok(())
    }

    pub async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.check_transfer(address, buf.len())?;

        let key = self.keys.map_or(UnlockKeys::NONE.read, |keys| keys.read);
        self.device
            .read(address, buf, key)
            .await
            .map_err(|_| Error::Fail)
    }

    /// Write `data` at `address`, preserving every other byte of the page.
    ///
    /// The whole write must fall within a single page.
    pub async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.check_transfer(address, data.len())?;

        let offset = Self::page_offset(address);
        if offset + data.len() > PAGE {
            return Err(Error::InvalidArguments);
        }

        let keys = self.held_keys()?;
        self.scratch[offset..offset + data.len()].copy_from_slice(data);
        self.program_merged(Self::page_start(address), offset, data.len(), keys)
            .await
    }

    /// Fill the scratch buffer around `[offset, offset + len)`, which already holds the new
    /// bytes, from the current page contents and reprogram the page.
    async fn program_merged(
        &mut self,
        page_start: u32,
        offset: usize,
        len: usize,
        keys: UnlockKeys,
    ) -> Result<(), Error> {
        if offset > 0 {
            self.device
                .read(page_start, &mut self.scratch[..offset], keys.read)
                .await
                .map_err(|_| Error::Fail)?;
        }

        let loaded = offset + len;
        if loaded < PAGE {
            self.device
                .read(
                    page_start + loaded as u32,
                    &mut self.scratch[loaded..],
                    keys.read,
                )
                .await
                .map_err(|_| Error::Fail)?;
        }

        self.device
            .erase_page(page_start, keys.erase)
            .await
            .inspect_err(|_| log::error!("erase of page {:#x} failed", page_start))
            .map_err(|_| Error::Fail)?;

        self.device
            .program_page(page_start, &self.scratch, keys.row_write)
            .await
            .inspect_err(|_| log::error!("programming page {:#x} failed", page_start))
            .map_err(|_| Error::Fail)
    }

    pub async fn erase(&mut self, page_address: u32) -> Result<(), Error> {
        if page_address % PAGE as u32 != 0 || page_address >= self.flash_size() {
            return Err(Error::InvalidArguments);
        }

        let keys = self.held_keys()?;
        self.device
            .erase_page(page_address, keys.erase)
            .await
            .inspect_err(|_| log::error!("erase of page {:#x} failed", page_address))
            .map_err(|_| Error::Fail)
    }

    /// Copy `len` bytes from `src` to `dst`, one destination page at a time.
    ///
    /// Stops at the first failing page.
    pub async fn copy(&mut self, src: u32, dst: u32, len: u32) -> Result<(), Error> {
        let flash_size = self.flash_size() as u64;
        let (src_end, dst_end) = (src as u64 + len as u64, dst as u64 + len as u64);

        if len == 0 || src_end > flash_size || dst_end > flash_size {
            return Err(Error::InvalidArguments);
        }
        // Identical ranges count as overlapping.
        if (src as u64) < dst_end && (dst as u64) < src_end {
            return Err(Error::InvalidArguments);
        }

        let keys = self.held_keys()?;

        let mut done = 0;
        while done < len {
            let (from, to) = (src + done, dst + done);
            let offset = Self::page_offset(to);
            let chunk = (PAGE - offset).min((len - done) as usize);

            self.device
                .read(from, &mut self.scratch[offset..offset + chunk], keys.read)
                .await
                .map_err(|_| Error::Fail)?;
            self.program_merged(Self::page_start(to), offset, chunk, keys)
                .await?;

            done += chunk as u32;
        }

        Ok(())
    }

    /// Execute a single page copy planned by a strategy.
    pub async fn execute(&mut self, config: &Config, operation: CopyOperation) -> Result<(), Error> {
        let address = |location: MemoryLocation| {
            config.partition_address(location.slot) + location.page.0 as u32 * PAGE as u32
        };

        self.copy(address(operation.from), address(operation.to), PAGE as u32)
            .await
    }

    /// Write bytes to byte-addressable persistent storage, checking the status of every byte.
    pub async fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.check_eeprom_transfer(address, data.len())?;

        let keys = self.held_keys()?;
        for (address, value) in (address..).zip(data) {
            self.device
                .write_eeprom_byte(address, *value, keys.byte_write)
                .await
                .inspect_err(|_| log::error!("eeprom write at {:#x} failed", address))
                .map_err(|_| Error::Fail)?;
        }

        Ok(())
    }

    /// Read persistent bytes back. Needs no keys.
    pub async fn read_eeprom(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.check_eeprom_transfer(address, buf.len())?;

        self.device
            .read_eeprom(address, buf)
            .await
            .inspect_err(|_| log::error!("eeprom read at {:#x} failed", address))
            .map_err(|_| Error::Fail)
    }

    fn check_eeprom_transfer(&self, address: u32, len: usize) -> Result<(), Error> {
        let range = self.device.eeprom_range().ok_or(Error::UnknownCommand)?;
        if len == 0 || address < range.start || address as u64 + len as u64 > range.end as u64 {
            return Err(Error::InvalidArguments);
        }
        Ok(())
    }
}

/// Scoped acquisition of an unlock key set.
pub struct Unlocked<'a, D: FlashDevice, const PAGE: usize> {
    memory: &'a mut Memory<D, PAGE>,
}

impl<D: FlashDevice, const PAGE: usize> Deref for Unlocked<'_, D, PAGE> {
    type Target = Memory<D, PAGE>;

    fn deref(&self) -> &Self::Target {
        self.memory
    }
}

impl<D: FlashDevice, const PAGE: usize> DerefMut for Unlocked<'_, D, PAGE> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.memory
    }
}

impl<D: FlashDevice, const PAGE: usize> Drop for Unlocked<'_, D, PAGE> {
    fn drop(&mut self) {
        self.memory.keys = None;
    }
}
