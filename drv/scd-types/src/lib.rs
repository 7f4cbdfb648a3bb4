// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common types for the SCD SMBus engine and its control plane
//!
//! This crate works on both the host and embedded system, so it can be used in
//! host-side tests.

#![no_std]

use num_derive::FromPrimitive;

/// Largest payload of an SMBus block transfer.
pub const BLOCK_MAX: usize = 32;

/// The response code returned by the SMBus engine and the topology control
/// plane.  As with the I2C server, codes are deliberately specific: each
/// transport failure gets its own code so that traces and callers can tell
/// an ack failure from a stuck FIFO, even though all of them are reported
/// upward as I/O errors.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ResponseCode {
    /// A command line was malformed: unknown verb, missing or extra token,
    /// unparseable integer, or a value outside its field.
    BadArg = 1,
    /// A register address is beyond the device's register space.
    AddressOutOfRange,
    /// A master id, LED address or attribute name is already registered.
    AlreadyExists,
    /// The topology is locked; no further objects may be registered.
    Busy,
    /// No bus is registered under the requested adapter number.
    NoBus,
    /// No GPIO, reset or LED is registered under the requested name.
    NoAttribute,
    /// The attribute cannot be written.
    ReadOnly,
    /// Growing a registry failed.
    OutOfMemory,
    /// The SMBus transaction kind is not implemented by the engine.
    OperationNotSupported,
    /// A block transfer asked for more than [`BLOCK_MAX`] bytes.
    TooMuchData,
    /// The response FIFO stayed empty through every poll.
    FifoEmpty,
    /// The target did not acknowledge a byte.
    AckError,
    /// The master's SCL timeout fired, implying a target held the bus low.
    Timeout,
    /// The master lost arbitration: SDA was sampled low while it drove high.
    BusConflict,
    /// The slot was flushed from the FIFO before it executed.
    Flushed,
    /// A response carried a slot index other than the one expected.
    TidMismatch,
}

mod errno {
    pub const EPERM: u32 = 1;
    pub const ENOENT: u32 = 2;
    pub const EIO: u32 = 5;
    pub const ENOMEM: u32 = 12;
    pub const EBUSY: u32 = 16;
    pub const EEXIST: u32 = 17;
    pub const ENODEV: u32 = 19;
    pub const EINVAL: u32 = 22;
    pub const EPROTO: u32 = 71;
    pub const EOPNOTSUPP: u32 = 95;
}

impl ResponseCode {
    /// True for every failure detected on the wire.  These are the only
    /// failures worth retrying, and the only ones that reset the bus.
    pub fn is_io(self) -> bool {
        matches!(
            self,
            ResponseCode::FifoEmpty
                | ResponseCode::AckError
                | ResponseCode::Timeout
                | ResponseCode::BusConflict
                | ResponseCode::Flushed
                | ResponseCode::TidMismatch
        )
    }

    /// The positive errno reported through the control surface.
    pub fn errno(self) -> u32 {
        match self {
            ResponseCode::BadArg | ResponseCode::AddressOutOfRange => {
                errno::EINVAL
            }
            ResponseCode::AlreadyExists => errno::EEXIST,
            ResponseCode::Busy => errno::EBUSY,
            ResponseCode::NoBus => errno::ENODEV,
            ResponseCode::NoAttribute => errno::ENOENT,
            ResponseCode::ReadOnly => errno::EPERM,
            ResponseCode::OutOfMemory => errno::ENOMEM,
            ResponseCode::OperationNotSupported => errno::EOPNOTSUPP,
            ResponseCode::TooMuchData => errno::EPROTO,
            _ => errno::EIO,
        }
    }
}

impl core::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ResponseCode::BadArg => "invalid argument",
            ResponseCode::AddressOutOfRange => "address out of range",
            ResponseCode::AlreadyExists => "already exists",
            ResponseCode::Busy => "topology is locked",
            ResponseCode::NoBus => "no such bus",
            ResponseCode::NoAttribute => "no such attribute",
            ResponseCode::ReadOnly => "attribute is read-only",
            ResponseCode::OutOfMemory => "out of memory",
            ResponseCode::OperationNotSupported => "operation not supported",
            ResponseCode::TooMuchData => "block too long",
            ResponseCode::FifoEmpty => "response fifo empty",
            ResponseCode::AckError => "ack error",
            ResponseCode::Timeout => "timeout error",
            ResponseCode::BusConflict => "bus conflict",
            ResponseCode::Flushed => "flushed",
            ResponseCode::TidMismatch => "tid mismatch",
        };
        write!(f, "{msg} (errno {})", self.errno())
    }
}

/// Direction of an SMBus transaction, with the values of the R/W bit.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u8)]
pub enum ReadWrite {
    Write = 0,
    Read = 1,
}

/// The SMBus transaction kinds, numbered as the Linux SMBus API numbers its
/// transaction sizes.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum Access {
    Quick = 0,
    Byte = 1,
    ByteData = 2,
    WordData = 3,
    ProcCall = 4,
    BlockData = 5,
    I2cBlockBroken = 6,
    BlockProcCall = 7,
    I2cBlockData = 8,
}

///
/// The buffer moved by one SMBus transaction.  Byte transfers use
/// `block[0]`; word transfers use `block[0..2]`, low byte first; block
/// transfers carry the length in `block[0]` and the payload after it.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SmbusData {
    pub block: [u8; BLOCK_MAX + 2],
}

impl Default for SmbusData {
    fn default() -> Self {
        Self {
            block: [0; BLOCK_MAX + 2],
        }
    }
}

impl SmbusData {
    pub fn from_byte(byte: u8) -> Self {
        let mut data = Self::default();
        data.block[0] = byte;
        data
    }

    pub fn from_word(word: u16) -> Self {
        let mut data = Self::default();
        data.set_word(word);
        data
    }

    /// Builds a block buffer; `None` if `payload` exceeds [`BLOCK_MAX`].
    pub fn from_block(payload: &[u8]) -> Option<Self> {
        if payload.len() > BLOCK_MAX {
            return None;
        }

        let mut data = Self::default();
        data.block[0] = payload.len() as u8;
        data.block[1..=payload.len()].copy_from_slice(payload);
        Some(data)
    }

    pub fn byte(&self) -> u8 {
        self.block[0]
    }

    pub fn word(&self) -> u16 {
        u16::from_le_bytes([self.block[0], self.block[1]])
    }

    pub fn set_word(&mut self, word: u16) {
        self.block[..2].copy_from_slice(&word.to_le_bytes());
    }

    /// The block payload, as delimited by the length byte.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.block[0]).min(BLOCK_MAX);
        &self.block[1..=len]
    }
}
