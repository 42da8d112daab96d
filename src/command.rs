//! Command processing for the transfer protocol.
//!
//! The transport hands over one framed block at a time. Every block starts with a block header
//! followed by a command header; unlock blocks carry the image-format metadata in between.
//! All integers are little-endian.
//!
//! ```text
//! block header:   type u8 | length u16 (whole block, headers included)
//! command header: start address u32 | erase key u16 | row write key u16
//!                 | byte write key u16 | read key u16
//! unlock block:   block header | patch u8 | minor u8 | major u8 | device id u32
//!                 | max payload u16 | command header
//! write blocks:   block header | command header | payload
//! ```
//!
//! Nothing destructive is accepted until an unlock block matching this core and this device has
//! been processed. The unlock state is not kept inside the core; it is a [`Session`] value the
//! caller passes in and gets back with every command.

use crate::{Bootloader, Error, FlashDevice, UnlockKeys, config::FormatVersion, log};

pub const UNLOCK_BOOTLOADER: u8 = 0x01;
pub const WRITE_FLASH: u8 = 0x02;
pub const WRITE_EEPROM: u8 = 0x03;

pub const BLOCK_HEADER_SIZE: usize = 3;
pub const COMMAND_HEADER_SIZE: usize = 12;
const METADATA_SIZE: usize = 3 + 4 + 2;
pub const UNLOCK_BLOCK_SIZE: usize = BLOCK_HEADER_SIZE + METADATA_SIZE + COMMAND_HEADER_SIZE;

/// Unlock state of an update session, handed back by [`Bootloader::process_command`].
///
/// A session starts locked. Only an accepted unlock block produces an unlocked one.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Session {
    unlocked: bool,
}

impl Session {
    pub const LOCKED: Session = Session { unlocked: false };
    const UNLOCKED: Session = Session { unlocked: true };

    pub const fn is_unlocked(&self) -> bool {
        self.unlocked
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    pub block_type: u8,
    pub length: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CommandHeader {
    pub start_address: u32,
    pub keys: UnlockKeys,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UnlockRequest {
    pub format_version: FormatVersion,
    pub device_id: u32,
    pub max_payload_size: u16,
    pub command: CommandHeader,
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let (head, rest) = self
            .bytes
            .split_first_chunk::<N>()
            .ok_or(Error::InvalidArguments)?;
        self.bytes = rest;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        self.take().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        self.take().map(u32::from_le_bytes)
    }

    fn rest(self) -> &'a [u8] {
        self.bytes
    }
}

impl BlockHeader {
    /// Split a packet into its header and the remainder of the block.
    ///
    /// The declared length must cover the header and fit inside the packet; bytes behind the
    /// declared length are ignored.
    pub fn parse(packet: &[u8]) -> Result<(BlockHeader, &[u8]), Error> {
        let mut reader = Reader { bytes: packet };
        let header = BlockHeader {
            block_type: reader.u8()?,
            length: reader.u16()?,
        };

        let length = header.length as usize;
        if length < BLOCK_HEADER_SIZE || length > packet.len() {
            return Err(Error::InvalidArguments);
        }

        Ok((header, &packet[BLOCK_HEADER_SIZE..length]))
    }
}

impl CommandHeader {
    fn read(reader: &mut Reader<'_>) -> Result<CommandHeader, Error> {
        Ok(CommandHeader {
            start_address: reader.u32()?,
            keys: UnlockKeys {
                erase: reader.u16()?,
                row_write: reader.u16()?,
                byte_write: reader.u16()?,
                read: reader.u16()?,
            },
        })
    }

    /// Parse the command header at the start of a block body, returning it with the payload.
    pub fn parse(body: &[u8]) -> Result<(CommandHeader, &[u8]), Error> {
        let mut reader = Reader { bytes: body };
        let header = CommandHeader::read(&mut reader)?;
        Ok((header, reader.rest()))
    }
}

impl UnlockRequest {
    pub fn parse(body: &[u8]) -> Result<UnlockRequest, Error> {
        let mut reader = Reader { bytes: body };
        let patch = reader.u8()?;
        let minor = reader.u8()?;
        let major = reader.u8()?;

        Ok(UnlockRequest {
            format_version: FormatVersion {
                major,
                minor,
                patch,
            },
            device_id: reader.u32()?,
            max_payload_size: reader.u16()?,
            command: CommandHeader::read(&mut reader)?,
        })
    }
}

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Process a single block received by the transport.
    ///
    /// Returns the session to use for the next block together with the outcome of this one.
    pub async fn process_command(
        &mut self,
        session: Session,
        packet: &[u8],
    ) -> (Session, Result<(), Error>) {
        let (header, body) = match BlockHeader::parse(packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("malformed block of {:?} bytes", packet.len());
                return (session, Err(e));
            }
        };

        match header.block_type {
            UNLOCK_BOOTLOADER => self.unlock(body).await,
            WRITE_FLASH if session.unlocked => (session, self.write_flash(body).await),
            WRITE_EEPROM if session.unlocked => (session, self.write_eeprom(body).await),
            block_type => {
                log::warn!("block {:#x} rejected in {:?} session", block_type, session);
                (session, Err(Error::UnknownCommand))
            }
        }
    }

    async fn unlock(&mut self, body: &[u8]) -> (Session, Result<(), Error>) {
        let request = match UnlockRequest::parse(body) {
            Ok(request) => request,
            Err(e) => return (Session::LOCKED, Err(e)),
        };

        if let Err(e) = self.check_unlock(&request).await {
            return (Session::LOCKED, Err(e));
        }

        log::info!("session unlocked, erasing staging partition");
        (Session::UNLOCKED, self.erase_staging(request.command.keys).await)
    }

    /// Compare every field of an unlock request against this core and this device.
    async fn check_unlock(&mut self, request: &UnlockRequest) -> Result<(), Error> {
        let supported = self.config.format_version;
        let mut accepted = true;

        if request.format_version.major != supported.major {
            log::warn!("unlock: format major {:?} unsupported", request.format_version.major);
            accepted = false;
        }
        if request.format_version.minor > supported.minor {
            log::warn!("unlock: format minor {:?} unsupported", request.format_version.minor);
            accepted = false;
        }

        match self
            .memory
            .device_mut()
            .read_device_id(self.config.device_id_address)
            .await
        {
            Ok(id) if id == request.device_id => {}
            Ok(id) => {
                log::warn!("unlock: device id {:#x}, expected {:#x}", request.device_id, id);
                accepted = false;
            }
            Err(e) => {
                log::error!("unlock: device id unreadable: {:?}", e);
                accepted = false;
            }
        }

        if request.max_payload_size != self.config.max_payload_size {
            log::warn!("unlock: payload size {:?} mismatch", request.max_payload_size);
            accepted = false;
        }
        if request.command.start_address != self.config.base_address {
            log::warn!("unlock: start address {:#x} mismatch", request.command.start_address);
            accepted = false;
        }
        if request.command.keys != D::UNLOCK_KEYS {
            log::warn!("unlock: memory keys mismatch");
            accepted = false;
        }

        if accepted {
            Ok(())
        } else {
            Err(Error::VerificationFail)
        }
    }

    /// Erase the staging partition page by page, stopping at the first failing page.
    async fn erase_staging(&mut self, keys: UnlockKeys) -> Result<(), Error> {
        let start = self.config.partition_address(self.config.staging);

        for page in 0..self.config.page_count(PAGE as u32) as u32 {
            let address = start + page * PAGE as u32;
            self.memory
                .unlock(keys)
                .erase(address)
                .await
                .map_err(|e| {
                    log::error!("staging erase stopped at {:#x}: {:?}", address, e);
                    Error::CommandProcessingError
                })?;
        }

        Ok(())
    }

    /// Write one payload into the staging partition.
    ///
    /// Addresses in the command are relative to the primary partition.
    async fn write_flash(&mut self, body: &[u8]) -> Result<(), Error> {
        let (command, payload) = CommandHeader::parse(body)?;
        if payload.is_empty() || payload.len() > self.config.max_payload_size as usize {
            return Err(Error::InvalidArguments);
        }

        let staging = self.config.partition_address(self.config.staging);
        let staging_end = staging + self.config.partition_size;
        let target = command
            .start_address
            .checked_add(staging - self.config.base_address)
            .filter(|target| {
                target % PAGE as u32 == 0
                    && *target >= staging
                    && *target as u64 + payload.len() as u64 <= staging_end as u64
            })
            .ok_or_else(|| {
                log::warn!("write to {:#x} outside staging", command.start_address);
                Error::AddressOutOfRange
            })?;

        self.memory
            .unlock(command.keys)
            .write(target, payload)
            .await
            .map_err(|e| {
                log::error!("write at {:#x} failed: {:?}", target, e);
                Error::CommandProcessingError
            })
    }

    async fn write_eeprom(&mut self, body: &[u8]) -> Result<(), Error> {
        let Some(range) = self.memory.device().eeprom_range() else {
            return Err(Error::UnknownCommand);
        };

        let (command, payload) = CommandHeader::parse(body)?;
        if payload.is_empty() {
            return Err(Error::InvalidArguments);
        }

        let end = command.start_address as u64 + payload.len() as u64;
        if command.start_address < range.start || end > range.end as u64 {
            log::warn!("eeprom write to {:#x} out of range", command.start_address);
            return Err(Error::AddressOutOfRange);
        }

        self.memory
            .unlock(command.keys)
            .write_eeprom(command.start_address, payload)
            .await
            .map_err(|_| Error::CommandProcessingError)
    }
}
