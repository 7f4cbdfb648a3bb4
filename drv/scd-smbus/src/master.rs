// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SMBus master engine.
//!
//! A transaction is executed in one pass under the master's lock: every
//! request slot is written to the request FIFO, then exactly one response
//! word per slot is read back and checked, in slot order.  The first bad
//! response aborts the transaction, and any wire-level failure resets the
//! master before the lock is dropped, so the next transaction always starts
//! against an empty FIFO.

use std::sync::{Arc, Mutex, PoisonError};

use drv_scd_types::{Access, ReadWrite, ResponseCode, SmbusData, BLOCK_MAX};
use ringbuf::{ringbuf_entry, Level};

use crate::params::BusParams;
use crate::regs::{
    ControlStatus, RequestWord, ResponseWord, CS_OFFSET, FIFO_EMPTY_SENTINEL,
    REQ_OFFSET, RESP_OFFSET,
};
use crate::{Registers, SmbusLog, Trace};

/// Retries made for an empty response FIFO, after the first read.
const RESP_RETRIES: u32 = 10;
/// Wait between response FIFO polls.
const RESP_POLL_MS: u32 = 10;
/// How long the reset bit is held.
const RESET_HOLD_MS: u32 = 10;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

///
/// One fully-shaped transaction: which bus and target, which SMBus kind, and
/// how many FIFO slots it occupies.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    pub bus: u8,
    pub addr: u8,
    pub rw: ReadWrite,
    pub command: u8,
    pub access: Access,
    pub slots: u8,
}

/// Number of FIFO slots an SMBus transaction occupies.  `len` is the block
/// length for the block kinds and is ignored otherwise; for a BLOCK_DATA
/// read it is the length reported by the target.
pub fn slot_count(
    access: Access,
    rw: ReadWrite,
    len: u8,
) -> Result<u8, ResponseCode> {
    let block = || {
        if usize::from(len) > BLOCK_MAX {
            Err(ResponseCode::TooMuchData)
        } else {
            Ok(len)
        }
    };

    let read = rw == ReadWrite::Read;

    Ok(match access {
        Access::Quick => 1,
        Access::Byte => 2,
        Access::ByteData if read => 4,
        Access::ByteData => 3,
        Access::WordData if read => 5,
        Access::WordData => 4,
        Access::I2cBlockData if read => 3 + block()?,
        Access::I2cBlockData => 2 + block()?,
        Access::BlockData if read => 4 + block()?,
        Access::BlockData => 3 + block()?,
        Access::ProcCall | Access::BlockProcCall | Access::I2cBlockBroken => {
            return Err(ResponseCode::OperationNotSupported);
        }
    })
}

impl Transfer {
    pub fn new(
        bus: u8,
        addr: u8,
        rw: ReadWrite,
        command: u8,
        access: Access,
        len: u8,
    ) -> Result<Self, ResponseCode> {
        if bus > 0xf || addr > 0x7f {
            return Err(ResponseCode::BadArg);
        }

        Ok(Self {
            bus,
            addr,
            rw,
            command,
            access,
            slots: slot_count(access, rw, len)?,
        })
    }

    fn is_read(&self) -> bool {
        self.rw == ReadWrite::Read
    }

    ///
    /// Builds the request words for this transfer, in FIFO order.  Payload
    /// bytes for writes come from `data`.
    ///
    /// The master drives SDA (`dod`) for the address, the command, the
    /// repeated-start address of a read, and every byte of a write; it
    /// receives on the data slots of a read, and acknowledges (`da`) every
    /// received byte except the one followed by the stop.
    ///
    pub fn encode(
        &self,
        params: BusParams,
        data: &SmbusData,
    ) -> Vec<RequestWord> {
        let ss = self.slots;
        let read = self.is_read();
        let offset = usize::from(self.access == Access::I2cBlockData);

        (0..ss)
            .map(|i| {
                let mut req = RequestWord::from(0);
                req.set_bs(self.bus);
                req.set_t(params.t);
                req.set_ti(i & 0xf);

                match i {
                    0 => {
                        // Only QUICK and BYTE carry their direction in the
                        // first address; everything longer writes the
                        // command first.
                        let rw = if ss <= 2 { self.rw as u8 } else { 0 };
                        req.set_ss(ss);
                        req.set_st(true);
                        req.set_dod(true);
                        req.set_d((self.addr << 1) | rw);
                    }
                    1 => {
                        req.set_d(self.command);
                        req.set_dod(!(read && ss == 2));
                    }
                    2 if read => {
                        req.set_st(true);
                        req.set_dod(true);
                        req.set_d((self.addr << 1) | 1);
                    }
                    _ if read => {}
                    _ => {
                        let ndx = usize::from(i) - 2 + offset;
                        req.set_d(data.block[ndx]);
                        req.set_dod(true);
                    }
                }

                if i == ss - 1 {
                    req.set_sp(true);
                    req.set_dat(if read { params.datr } else { params.datw });
                }

                req.set_da(!(req.dod() || req.sp()));
                req
            })
            .collect()
    }

    /// Stores the byte received in slot `i` of a read into `data`.
    fn decode(&self, i: u8, byte: u8, data: &mut SmbusData) {
        let ss = self.slots;
        let i = usize::from(i);

        match self.access {
            Access::Byte | Access::ByteData if i == usize::from(ss) - 1 => {
                data.block[0] = byte;
            }
            Access::WordData if i == usize::from(ss) - 2 => {
                data.block[0] = byte;
            }
            Access::WordData if i == usize::from(ss) - 1 => {
                data.block[1] = byte;
            }
            Access::BlockData if i >= 3 => {
                data.block[i - 3] = byte;
            }
            Access::I2cBlockData if i >= 3 => {
                data.block[i - 2] = byte;
            }
            _ => {}
        }
    }
}

///
/// Checks one response word against the slot index it should answer.  The
/// FIFO-empty sentinel is checked first, since it has every flag set.
///
pub fn check_response(resp: ResponseWord, tid: u8) -> Result<(), ResponseCode> {
    if resp.bits() == FIFO_EMPTY_SENTINEL {
        return Err(ResponseCode::FifoEmpty);
    }

    if resp.ack_error() {
        return Err(ResponseCode::AckError);
    }

    if resp.timeout_error() {
        return Err(ResponseCode::Timeout);
    }

    if resp.bus_conflict_error() {
        return Err(ResponseCode::BusConflict);
    }

    if resp.flushed() {
        return Err(ResponseCode::Flushed);
    }

    if resp.ti() != tid & 0xf {
        return Err(ResponseCode::TidMismatch);
    }

    Ok(())
}

///
/// One hardware SMBus master.  All of its buses share its FIFOs, so every
/// transaction on any of them is serialized on `lock`.
///
pub struct SmbusMaster<R: Registers> {
    regs: Arc<R>,
    trace: Arc<SmbusLog>,
    id: u32,
    base: u32,
    max_retries: u32,
    lock: Mutex<()>,
}

impl<R: Registers> SmbusMaster<R> {
    pub fn new(
        regs: Arc<R>,
        trace: Arc<SmbusLog>,
        id: u32,
        base: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            regs,
            trace,
            id,
            base,
            max_retries,
            lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub(crate) fn trace(&self) -> &SmbusLog {
        &self.trace
    }

    fn req(&self) -> u32 {
        self.base + REQ_OFFSET
    }

    fn cs(&self) -> u32 {
        self.base + CS_OFFSET
    }

    fn resp(&self) -> u32 {
        self.base + RESP_OFFSET
    }

    /// Resets the master, waiting for any transaction in flight.
    pub fn reset(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.reset_locked();
    }

    /// Pulses reset with force-output-enable set.  Caller holds `lock`.
    fn reset_locked(&self) {
        ringbuf_entry!(
            self.trace,
            Level::Info,
            Trace::MasterReset { master: self.id }
        );

        let mut cs = ControlStatus::from(self.regs.read(self.cs()));
        cs.set_reset(true);
        cs.set_foe(true);
        self.regs.write(self.cs(), cs.bits());

        self.regs.delay_ms(RESET_HOLD_MS);

        cs.set_reset(false);
        self.regs.write(self.cs(), cs.bits());
    }

    ///
    /// Reads the next response word, polling while the FIFO reports empty.
    /// If it never fills, the sentinel is returned in its place.
    ///
    fn read_response(&self) -> ResponseWord {
        let mut resp = ResponseWord::from(self.regs.read(self.resp()));
        let mut retries = RESP_RETRIES;

        while resp.fe() && retries > 0 {
            retries -= 1;
            self.regs.delay_ms(RESP_POLL_MS);
            resp = ResponseWord::from(self.regs.read(self.resp()));
        }

        if resp.fe() {
            ringbuf_entry!(
                self.trace,
                Level::Info,
                Trace::FifoEmpty { master: self.id }
            );
            return ResponseWord::from(FIFO_EMPTY_SENTINEL);
        }

        ringbuf_entry!(
            self.trace,
            Level::Debug,
            Trace::Response {
                master: self.id,
                word: resp.bits()
            }
        );

        resp
    }

    ///
    /// Executes one transfer.  For reads, received bytes land in `data`; on
    /// failure `data` may hold a partial result and must not be trusted.
    ///
    pub fn transact(
        &self,
        xfer: &Transfer,
        params: BusParams,
        data: &mut SmbusData,
    ) -> Result<(), ResponseCode> {
        let requests = xfer.encode(params, data);

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let rval = self.run(xfer, &requests, data);

        if let Err(code) = rval {
            if code.is_io() {
                self.reset_locked();
            }
        }

        rval
    }

    fn run(
        &self,
        xfer: &Transfer,
        requests: &[RequestWord],
        data: &mut SmbusData,
    ) -> Result<(), ResponseCode> {
        for req in requests {
            ringbuf_entry!(
                self.trace,
                Level::Debug,
                Trace::Request {
                    master: self.id,
                    word: req.bits()
                }
            );
            self.regs.write(self.req(), req.bits());
        }

        for i in 0..xfer.slots {
            let resp = self.read_response();

            if let Err(code) = check_response(resp, i) {
                ringbuf_entry!(
                    self.trace,
                    Level::Info,
                    Trace::BadResponse {
                        master: self.id,
                        word: resp.bits(),
                        code,
                    }
                );
                return Err(code);
            }

            if xfer.is_read() {
                xfer.decode(i, resp.d(), data);
            }
        }

        Ok(())
    }
}
