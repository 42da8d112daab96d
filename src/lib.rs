//! Firmware update core for bootloaders with a handful of fixed-size flash partitions.
//!
//! The crate decides on every boot whether to run the installed application or to stay in
//! update mode, promotes staged images, restores a backup image when the primary one is
//! corrupted, and refuses to roll back to older firmware.
//!
//! Hardware is reached through a single [`FlashDevice`] implementation per target.
//! All destructive memory access goes through [`memory::Memory`], which owns the page scratch
//! buffer and only accepts writes while an unlock key set is held.
#![no_std]

use core::fmt;

use serde::{Deserialize, Serialize};

pub mod boot;
pub mod command;
pub mod config;
pub mod crc;
pub mod entry;
pub mod footer;
pub mod memory;
pub mod nor;
pub mod orchestrator;
pub mod rollback;
pub mod state;
pub mod strategies;
pub mod verify;

pub use config::Config;
pub use memory::Memory;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use ::log;

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! info {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
    }
    pub(crate) use info;
    macro_rules! debug {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
    }
    pub(crate) use debug;
    // `warn` would clash with the built-in lint attribute.
    macro_rules! warner {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
    }
    pub(crate) use warner as warn;
    macro_rules! error {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
    }
    pub(crate) use error;
}

/// Failure reported by the core.
///
/// Success (`Pass`) is represented by `Ok`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A hardware read, erase or program step reported failure.
    Fail,
    /// Checksum mismatch, or an unlock handshake field did not match.
    VerificationFail,
    /// Malformed address, length or image id. Detected before any hardware access.
    InvalidArguments,
    /// Address outside the region the operation may touch.
    AddressOutOfRange,
    /// A command was accepted but the memory operation it requested failed.
    CommandProcessingError,
    /// Block type not known to this core, or not enabled on this target.
    UnknownCommand,
    /// Image version does not supersede the installed one, or is not a valid version.
    RollbackFailure,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::Fail => "memory operation failed",
            Error::VerificationFail => "verification failed",
            Error::InvalidArguments => "invalid arguments",
            Error::AddressOutOfRange => "address out of range",
            Error::CommandProcessingError => "command processing error",
            Error::UnknownCommand => "unknown command",
            Error::RollbackFailure => "rollback check failed",
        };
        f.write_str(s)
    }
}

/// Image slot with regards to the bootloader.
///
/// Slot 0 is always the execution slot. Every slot occupies one partition of identical size,
/// laid out back to back starting at [`Config::base_address`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot(pub(crate) u8);

impl Slot {
    /// The slot the application executes from.
    pub const PRIMARY: Slot = Slot(0);

    pub const fn new(index: u8) -> Self {
        Slot(index)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Page number within a slot, in units of [`FlashDevice::PAGE_SIZE`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Page(pub(crate) u16);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct MemoryLocation {
    slot: Slot,
    page: Page,
}

/// Erase `to` and copy `from` into it, leaving `from` intact.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CopyOperation {
    pub from: MemoryLocation,
    pub to: MemoryLocation,
}

/// Tokens gating the non-volatile memory controller.
///
/// They are handed to the hardware with every operation and must never outlive the
/// operation they were supplied for.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct UnlockKeys {
    pub erase: u16,
    pub row_write: u16,
    pub byte_write: u16,
    pub read: u16,
}

impl UnlockKeys {
    /// Cleared key set. Also the expected set on targets without an unlock sequence.
    pub const NONE: UnlockKeys = UnlockKeys {
        erase: 0,
        row_write: 0,
        byte_write: 0,
        read: 0,
    };
}

/// Raw non-volatile memory of a concrete target.
///
/// Addresses are byte addresses into program memory. Targets with word-addressed program memory
/// expose each word as its bytes in little-endian order.
/// Every operation only returns once the peripheral reports completion.
#[allow(async_fn_in_trait)]
pub trait FlashDevice {
    /// Size of the smallest erasable and programmable unit, in bytes.
    const PAGE_SIZE: usize;

    /// Keys the memory controller of this architecture expects.
    const UNLOCK_KEYS: UnlockKeys;

    /// Total size of program memory in bytes.
    fn flash_size(&self) -> u32;

    async fn read(&mut self, address: u32, buf: &mut [u8], key: u16) -> Result<(), Error>;

    /// Erase the page starting at `address`.
    async fn erase_page(&mut self, address: u32, key: u16) -> Result<(), Error>;

    /// Program a full page starting at `address`. The page must have been erased.
    async fn program_page(&mut self, address: u32, data: &[u8], key: u16) -> Result<(), Error>;

    /// Read the hardware device identifier stored at `address`.
    async fn read_device_id(&mut self, address: u32) -> Result<u32, Error>;

    /// Address range of byte-addressable persistent storage, if the target has it.
    fn eeprom_range(&self) -> Option<core::ops::Range<u32>> {
        None
    }

    async fn read_eeprom(&mut self, _address: u32, _buf: &mut [u8]) -> Result<(), Error> {
        Err(Error::UnknownCommand)
    }

    async fn write_eeprom_byte(&mut self, _address: u32, _value: u8, _key: u16) -> Result<(), Error> {
        Err(Error::UnknownCommand)
    }
}

/// The update core bound to one device and one partition layout.
///
/// Operations of the individual components are implemented on this type in their own modules.
pub struct Bootloader<D: FlashDevice, const PAGE: usize> {
    pub(crate) memory: Memory<D, PAGE>,
    pub(crate) config: Config,
}

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Bind a device to a layout, checking the layout preconditions first.
    pub fn new(device: D, config: Config) -> Result<Self, Error> {
        let memory = Memory::new(device);
        config.validate(memory.flash_size(), PAGE as u32)?;

        Ok(Self { memory, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn memory(&mut self) -> &mut Memory<D, PAGE> {
        &mut self.memory
    }

    pub fn into_device(self) -> D {
        self.memory.into_device()
    }
}
