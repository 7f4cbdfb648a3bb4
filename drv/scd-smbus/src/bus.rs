// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One SMBus adapter: a bus number on a master.

use std::sync::{Arc, Mutex, PoisonError};

use drv_scd_types::{Access, ReadWrite, ResponseCode, SmbusData};
use ringbuf::{ringbuf_entry, Level};

use crate::master::{SmbusMaster, Transfer};
use crate::params::{BusParamTable, BusParams};
use crate::{Registers, Trace};

pub struct SmbusBus<R: Registers> {
    master: Arc<SmbusMaster<R>>,
    id: u8,
    adapter: u32,
    name: String,
    params: Mutex<BusParamTable>,
}

impl<R: Registers> SmbusBus<R> {
    pub fn new(
        master: Arc<SmbusMaster<R>>,
        id: u8,
        adapter: u32,
        name: String,
    ) -> Self {
        Self {
            master,
            id,
            adapter,
            name,
            params: Mutex::new(BusParamTable::default()),
        }
    }

    /// Bus number within the master, as sent in the `bs` field.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Externally visible adapter number.
    pub fn adapter_nr(&self) -> u32 {
        self.adapter
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &Arc<SmbusMaster<R>> {
        &self.master
    }

    pub fn params(&self, addr: u8) -> BusParams {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
    }

    /// Sets the transaction shape for one target, replacing any earlier
    /// override for it.
    pub fn tweak(
        &self,
        addr: u8,
        params: BusParams,
    ) -> Result<(), ResponseCode> {
        if addr > 0x7f {
            return Err(ResponseCode::BadArg);
        }

        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(addr, params)
    }

    pub fn tweaks(&self) -> Vec<(u8, BusParams)> {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .collect()
    }

    ///
    /// Performs one SMBus transaction, retrying the whole transaction on
    /// wire-level failures up to the master's retry budget.  Other failures
    /// are returned at once.
    ///
    /// Every attempt starts from the caller's `data` and works on a copy;
    /// `data` is only updated when the transaction succeeds.
    ///
    pub fn smbus_xfer(
        &self,
        addr: u8,
        rw: ReadWrite,
        command: u8,
        access: Access,
        data: &mut SmbusData,
    ) -> Result<(), ResponseCode> {
        let trace = self.master.trace();
        let max_retries = self.master.max_retries();

        ringbuf_entry!(
            trace,
            Level::Debug,
            Trace::Transfer {
                adapter: self.adapter,
                addr,
                rw,
                command,
                access,
            }
        );

        let mut attempt = 0;

        loop {
            let mut scratch = *data;

            match self.smbus_do(addr, rw, command, access, &mut scratch) {
                Ok(()) => {
                    *data = scratch;
                    return Ok(());
                }
                Err(code) if code.is_io() => {
                    attempt += 1;

                    if attempt >= max_retries {
                        ringbuf_entry!(
                            trace,
                            Level::Warn,
                            Trace::Failed {
                                adapter: self.adapter,
                                addr,
                                code,
                            }
                        );
                        return Err(code);
                    }

                    ringbuf_entry!(
                        trace,
                        Level::Info,
                        Trace::Retry {
                            adapter: self.adapter,
                            addr,
                            attempt,
                        }
                    );
                }
                Err(code) => return Err(code),
            }
        }
    }

    fn smbus_do(
        &self,
        addr: u8,
        rw: ReadWrite,
        command: u8,
        access: Access,
        data: &mut SmbusData,
    ) -> Result<(), ResponseCode> {
        let params = self.params(addr);

        if access == Access::BlockData && rw == ReadWrite::Read {
            // The slot count depends on the length the target reports, so
            // fetch it first with a byte read of the same command.  The
            // master is free for other buses between the two phases.
            let probe = Transfer::new(
                self.id,
                addr,
                ReadWrite::Read,
                command,
                Access::ByteData,
                0,
            )?;
            self.master.transact(&probe, params, data)?;
        }

        let xfer =
            Transfer::new(self.id, addr, rw, command, access, data.byte())?;
        self.master.transact(&xfer, params, data)
    }

    pub fn quick(&self, addr: u8, rw: ReadWrite) -> Result<(), ResponseCode> {
        let mut data = SmbusData::default();
        self.smbus_xfer(addr, rw, 0, Access::Quick, &mut data)
    }

    pub fn read_byte(&self, addr: u8) -> Result<u8, ResponseCode> {
        let mut data = SmbusData::default();
        self.smbus_xfer(addr, ReadWrite::Read, 0, Access::Byte, &mut data)?;
        Ok(data.byte())
    }

    pub fn write_byte(&self, addr: u8, value: u8) -> Result<(), ResponseCode> {
        let mut data = SmbusData::default();
        self.smbus_xfer(addr, ReadWrite::Write, value, Access::Byte, &mut data)
    }

    pub fn read_byte_data(
        &self,
        addr: u8,
        command: u8,
    ) -> Result<u8, ResponseCode> {
        let mut data = SmbusData::default();
        self.smbus_xfer(
            addr,
            ReadWrite::Read,
            command,
            Access::ByteData,
            &mut data,
        )?;
        Ok(data.byte())
    }

    pub fn write_byte_data(
        &self,
        addr: u8,
        command: u8,
        value: u8,
    ) -> Result<(), ResponseCode> {
        let mut data = SmbusData::from_byte(value);
        self.smbus_xfer(
            addr,
            ReadWrite::Write,
            command,
            Access::ByteData,
            &mut data,
        )
    }

    pub fn read_word_data(
        &self,
        addr: u8,
        command: u8,
    ) -> Result<u16, ResponseCode> {
        let mut data = SmbusData::default();
        self.smbus_xfer(
            addr,
            ReadWrite::Read,
            command,
            Access::WordData,
            &mut data,
        )?;
        Ok(data.word())
    }

    pub fn write_word_data(
        &self,
        addr: u8,
        command: u8,
        value: u16,
    ) -> Result<(), ResponseCode> {
        let mut data = SmbusData::from_word(value);
        self.smbus_xfer(
            addr,
            ReadWrite::Write,
            command,
            Access::WordData,
            &mut data,
        )
    }

    ///
    /// SMBus block read.  Returns the number of bytes the target sent;
    /// fails with [`ResponseCode::TooMuchData`] if they don't fit in `buf`.
    ///
    pub fn read_block_data(
        &self,
        addr: u8,
        command: u8,
        buf: &mut [u8],
    ) -> Result<usize, ResponseCode> {
        let mut data = SmbusData::default();
        self.smbus_xfer(
            addr,
            ReadWrite::Read,
            command,
            Access::BlockData,
            &mut data,
        )?;

        let payload = data.payload();
        let dest = buf
            .get_mut(..payload.len())
            .ok_or(ResponseCode::TooMuchData)?;
        dest.copy_from_slice(payload);
        Ok(payload.len())
    }

    pub fn write_block_data(
        &self,
        addr: u8,
        command: u8,
        payload: &[u8],
    ) -> Result<(), ResponseCode> {
        let mut data =
            SmbusData::from_block(payload).ok_or(ResponseCode::TooMuchData)?;
        self.smbus_xfer(
            addr,
            ReadWrite::Write,
            command,
            Access::BlockData,
            &mut data,
        )
    }

    /// I2C block read of exactly `buf.len()` bytes.
    pub fn read_i2c_block_data(
        &self,
        addr: u8,
        command: u8,
        buf: &mut [u8],
    ) -> Result<(), ResponseCode> {
        let len = u8::try_from(buf.len())
            .map_err(|_| ResponseCode::TooMuchData)?;
        let mut data = SmbusData::from_byte(len);
        self.smbus_xfer(
            addr,
            ReadWrite::Read,
            command,
            Access::I2cBlockData,
            &mut data,
        )?;

        buf.copy_from_slice(&data.block[1..=buf.len()]);
        Ok(())
    }

    pub fn write_i2c_block_data(
        &self,
        addr: u8,
        command: u8,
        payload: &[u8],
    ) -> Result<(), ResponseCode> {
        let mut data =
            SmbusData::from_block(payload).ok_or(ResponseCode::TooMuchData)?;
        self.smbus_xfer(
            addr,
            ReadWrite::Write,
            command,
            Access::I2cBlockData,
            &mut data,
        )
    }
}
