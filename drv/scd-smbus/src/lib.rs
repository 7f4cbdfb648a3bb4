// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A driver for the SMBus masters found in the SCD switch-card FPGA.
//!
//! An SCD SMBus master is not a byte-at-a-time controller: each phase of a
//! bus cycle (address, command, data byte, repeated start) is described by
//! one 32-bit request word pushed into a FIFO, and the master answers every
//! request word with one response word carrying the byte it saw on the wire
//! plus error flags.  A master serves up to 16 buses, selected per word.
//!
//! This crate turns SMBus transactions into request word sequences and
//! response words back into results:
//!
//! - [`regs`] packs and unpacks the request, control/status and response
//!   words;
//! - [`params`] holds the per-target timing overrides ("tweaks");
//! - [`master`] is the engine proper, one transaction at a time per master;
//! - [`bus`] is the adapter face: retries, the two-phase block read, and the
//!   usual SMBus helper family;
//! - [`sim`] is a register-level model of a master and its targets.
//!
//! The hardware is reached only through the [`Registers`] trait.

use std::time::Duration;

use drv_scd_types::{Access, ReadWrite, ResponseCode};
use ringbuf::TraceLog;

pub mod bus;
pub mod master;
pub mod params;
pub mod regs;
pub mod sim;

pub use bus::SmbusBus;
pub use master::{SmbusMaster, Transfer};
pub use params::{BusParamTable, BusParams};

///
/// Access to the memory-mapped register space of one SCD.  Offsets are byte
/// offsets from the start of the space.
///
pub trait Registers: Send + Sync {
    fn read(&self, offset: u32) -> u32;

    fn write(&self, offset: u32, value: u32);

    /// Blocks the caller for `ms` milliseconds.  Every wait the engine
    /// performs goes through here.
    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms.into()));
    }
}

impl<R: Registers + ?Sized> Registers for std::sync::Arc<R> {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    MasterReset {
        master: u32,
    },
    Transfer {
        adapter: u32,
        addr: u8,
        rw: ReadWrite,
        command: u8,
        access: Access,
    },
    Request {
        master: u32,
        word: u32,
    },
    Response {
        master: u32,
        word: u32,
    },
    FifoEmpty {
        master: u32,
    },
    BadResponse {
        master: u32,
        word: u32,
        code: ResponseCode,
    },
    Retry {
        adapter: u32,
        addr: u8,
        attempt: u32,
    },
    Failed {
        adapter: u32,
        addr: u8,
        code: ResponseCode,
    },
}

/// Trace log shared by every master of one SCD.
pub type SmbusLog = TraceLog<Trace, 128>;
