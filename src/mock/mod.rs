use std::collections::BTreeMap;
use std::vec;
use std::vec::Vec;

use crate::{
    Bootloader, Config, Error, FlashDevice, Slot, UnlockKeys,
    config::FormatVersion,
    crc,
    footer::{CHECKSUM_OFFSET, FOOTER_SIZE, Footer, Version},
};

pub const PAGE_SIZE: usize = 64;
pub const FLASH_SIZE: u32 = 0x1000;
pub const EEPROM_START: u32 = 0xf000;
pub const EEPROM_SIZE: u32 = 256;
pub const DEVICE_ID_ADDRESS: u32 = 0x8006;
pub const DEVICE_ID: u32 = 0x30d4;

pub const KEYS: UnlockKeys = UnlockKeys {
    erase: 0x55aa,
    row_write: 0xaa55,
    byte_write: 0x5a5a,
    read: 0x0000,
};

pub const PRIMARY: Slot = Slot(0);
pub const STAGING: Slot = Slot(1);
pub const BACKUP: Slot = Slot(2);

pub const CONFIG: Config = Config {
    base_address: 0x400,
    partition_size: 0x400,
    partition_count: 3,
    staging: STAGING,
    backup: Some(BACKUP),
    anti_rollback: true,
    device_id_address: DEVICE_ID_ADDRESS,
    max_payload_size: PAGE_SIZE as u16,
    format_version: FormatVersion {
        major: 0,
        minor: 3,
        patch: 0,
    },
};

/// Number of erasures per page start address.
#[derive(Debug, Default)]
pub struct WearTracker(BTreeMap<u32, usize>);

impl WearTracker {
    pub fn increase(&mut self, page: u32) {
        *self.0.entry(page).or_insert(0) += 1;
    }

    /// Check wear on all pages inside `[start, end)` for worst wear.
    pub fn check_region(&self, start: u32, end: u32, wear_level: usize) -> bool {
        self.0
            .iter()
            .filter(|(page, _)| (start..end).contains(*page))
            .all(|(_, v)| *v <= wear_level)
    }

    pub fn erased(&self, page: u32) -> usize {
        self.0.get(&page).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Read(u32, usize),
    Erase(u32),
    Program(u32),
}

/// RAM backed program memory enforcing the unlock keys of [`KEYS`].
pub struct MockFlash {
    pub memory: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub wear: WearTracker,
    pub ops: Vec<Op>,
    pub device_id: u32,
    pub fail_erase_at: Option<u32>,
    /// Page whose next program fails. The fault fires once.
    pub fail_program_at: Option<u32>,
    pub fail_reads: bool,
    pub has_eeprom: bool,
}

impl MockFlash {
    pub fn new() -> MockFlash {
        MockFlash {
            memory: vec![0xff; FLASH_SIZE as usize],
            eeprom: vec![0xff; EEPROM_SIZE as usize],
            wear: WearTracker::default(),
            ops: Vec::new(),
            device_id: DEVICE_ID,
            fail_erase_at: None,
            fail_program_at: None,
            fail_reads: false,
            has_eeprom: true,
        }
    }

    /// Place raw bytes into a slot, bypassing the memory controller.
    pub fn install(&mut self, slot: Slot, image: &[u8]) {
        let start = CONFIG.partition_address(slot) as usize;
        self.memory[start..start + image.len()].copy_from_slice(image);
    }

    pub fn slot(&self, slot: Slot) -> &[u8] {
        let start = CONFIG.partition_address(slot) as usize;
        &self.memory[start..start + CONFIG.partition_size as usize]
    }

    pub fn flip_bit(&mut self, address: u32, bit: u8) {
        self.memory[address as usize] ^= 1 << bit;
    }

    /// Whether any page in `slot` has been erased.
    pub fn slot_touched(&self, slot: Slot) -> bool {
        let start = CONFIG.partition_address(slot);
        !self
            .wear
            .check_region(start, start + CONFIG.partition_size, 0)
    }
}

impl FlashDevice for MockFlash {
    const PAGE_SIZE: usize = PAGE_SIZE;
    const UNLOCK_KEYS: UnlockKeys = KEYS;

    fn flash_size(&self) -> u32 {
        FLASH_SIZE
    }

    async fn read(&mut self, address: u32, buf: &mut [u8], key: u16) -> Result<(), Error> {
        self.ops.push(Op::Read(address, buf.len()));
        if self.fail_reads || key != KEYS.read {
            return Err(Error::Fail);
        }

        let start = address as usize;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
        Ok(())
    }

    async fn erase_page(&mut self, address: u32, key: u16) -> Result<(), Error> {
        self.ops.push(Op::Erase(address));
        assert_eq!(address % PAGE_SIZE as u32, 0);
        if key != KEYS.erase || self.fail_erase_at == Some(address) {
            return Err(Error::Fail);
        }

        let start = address as usize;
        self.memory[start..start + PAGE_SIZE].fill(0xff);
        self.wear.increase(address);
        Ok(())
    }

    async fn program_page(&mut self, address: u32, data: &[u8], key: u16) -> Result<(), Error> {
        self.ops.push(Op::Program(address));
        assert_eq!(data.len(), PAGE_SIZE);
        if key != KEYS.row_write {
            return Err(Error::Fail);
        }
        if self.fail_program_at == Some(address) {
            self.fail_program_at = None;
            return Err(Error::Fail);
        }

        let page = &mut self.memory[address as usize..address as usize + PAGE_SIZE];
        // NOR cells can only be programmed after an erase.
        if page.iter().any(|b| *b != 0xff) {
            return Err(Error::Fail);
        }
        page.copy_from_slice(data);
        Ok(())
    }

    async fn read_device_id(&mut self, address: u32) -> Result<u32, Error> {
        if address != DEVICE_ID_ADDRESS {
            return Err(Error::Fail);
        }
        Ok(self.device_id)
    }

    fn eeprom_range(&self) -> Option<core::ops::Range<u32>> {
        self.has_eeprom
            .then_some(EEPROM_START..EEPROM_START + EEPROM_SIZE)
    }

    async fn read_eeprom(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let start = (address - EEPROM_START) as usize;
        buf.copy_from_slice(&self.eeprom[start..start + buf.len()]);
        Ok(())
    }

    async fn write_eeprom_byte(&mut self, address: u32, value: u8, key: u16) -> Result<(), Error> {
        if key != KEYS.byte_write {
            return Err(Error::Fail);
        }
        self.eeprom[(address - EEPROM_START) as usize] = value;
        Ok(())
    }
}

/// Build a partition image as the packaging tool would, addressed for the primary slot.
///
/// The checksum covers the body and every footer field preceding the checksum itself.
pub fn image(version: u32, target: Slot, fill: u8) -> Vec<u8> {
    let size = CONFIG.partition_size as usize;
    let mut image: Vec<u8> = (0..size)
        .map(|i| (i as u8).wrapping_mul(7) ^ fill)
        .collect();

    let footer_offset = size - FOOTER_SIZE;
    let footer = Footer {
        application_id: target.0 as u16,
        version: Version(version),
        verification_start: CONFIG.base_address,
        verification_end: CONFIG.base_address + (footer_offset + CHECKSUM_OFFSET) as u32 - 1,
        checksum: 0,
    };
    image[footer_offset..].copy_from_slice(&footer.to_bytes());

    let checksum = crc::checksum(&image[..footer_offset + CHECKSUM_OFFSET]);
    image[footer_offset + CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
    image
}

pub fn bootloader(flash: MockFlash) -> Bootloader<MockFlash, PAGE_SIZE> {
    Bootloader::new(flash, CONFIG).unwrap()
}

pub fn bootloader_with(flash: MockFlash, config: Config) -> Bootloader<MockFlash, PAGE_SIZE> {
    Bootloader::new(flash, config).unwrap()
}
