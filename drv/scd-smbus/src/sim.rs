// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A register-level model of an SCD, intended to convince the engine it is
//! talking to real SMBus masters.
//!
//! Offsets that belong to a registered master behave like its FIFOs and
//! control/status register; everything else is plain read/write memory.  A
//! master buffers request words until it sees the stop slot, runs the whole
//! transaction against its simulated targets, and then queues one response
//! word per slot.  Targets are byte-wide register files: writes store the
//! payload starting at the command byte, reads stream from the command byte
//! onward, and a command with a block attached streams the block's length
//! followed by its bytes.
//!
//! Delays are accounted, never slept.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::regs::{
    ControlStatus, RequestWord, ResponseWord, CS_OFFSET, REQ_OFFSET,
    RESP_OFFSET,
};
use crate::Registers;

/// A failure to inject into one upcoming transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// No response words are produced at all.
    FifoEmpty,
    Ack,
    Timeout,
    Conflict,
    Flushed,
    /// The first response carries the wrong slot index.
    BadTid,
}

#[derive(Clone, Debug)]
pub struct SimDevice {
    pub regs: [u8; 256],
    pub blocks: BTreeMap<u8, Vec<u8>>,
    pointer: u8,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self {
            regs: [0; 256],
            blocks: BTreeMap::new(),
            pointer: 0,
        }
    }
}

impl SimDevice {
    pub fn with_reg(mut self, reg: u8, value: u8) -> Self {
        self.regs[usize::from(reg)] = value;
        self
    }

    pub fn with_block(mut self, command: u8, payload: &[u8]) -> Self {
        self.blocks.insert(command, payload.to_vec());
        self
    }

    fn stream(&self, command: u8, n: usize) -> Vec<u8> {
        match self.blocks.get(&command) {
            Some(block) => std::iter::once(block.len() as u8)
                .chain(block.iter().copied())
                .chain(std::iter::repeat(0xff))
                .take(n)
                .collect(),
            None => (0..n)
                .map(|k| self.regs[(usize::from(command) + k) & 0xff])
                .collect(),
        }
    }

    fn store(&mut self, command: u8, payload: &[u8]) {
        for (k, byte) in payload.iter().enumerate() {
            self.regs[(usize::from(command) + k) & 0xff] = *byte;
        }
    }
}

/// A transaction as seen on the simulated wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimTransaction {
    pub bus: u8,
    pub addr: u8,
    pub read: bool,
    pub command: Option<u8>,
    pub slots: usize,
    pub fault: Option<Fault>,
}

#[derive(Default)]
struct SimMaster {
    cs: u32,
    pending: Vec<RequestWord>,
    responses: VecDeque<u32>,
    devices: BTreeMap<(u8, u8), SimDevice>,
    faults: VecDeque<Fault>,
    log: Vec<SimTransaction>,
    resets: usize,
    in_flight: bool,
    overlaps: usize,
}

impl SimMaster {
    fn request(&mut self, req: RequestWord) {
        if req.st() && req.ti() == 0 {
            if self.in_flight {
                self.overlaps += 1;
            }
            self.in_flight = true;
            self.pending.clear();
        }

        self.pending.push(req);

        if req.sp() {
            self.complete();
        }
    }

    fn complete(&mut self) {
        let slots = std::mem::take(&mut self.pending);
        let fault = self.faults.pop_front();

        let first = slots[0];
        let ss = slots.len();
        let bus = first.bs();
        let addr = first.d() >> 1;
        let read = if ss <= 2 {
            first.d() & 1 == 1
        } else {
            slots[2].st()
        };
        let command = slots.get(1).map(|s| s.d());

        self.log.push(SimTransaction {
            bus,
            addr,
            read,
            command,
            slots: ss,
            fault,
        });

        if fault == Some(Fault::FifoEmpty) {
            return;
        }

        let mut bytes: Vec<u8> = slots.iter().map(|s| s.d()).collect();
        let device = self.devices.get_mut(&(bus, addr));
        let nack = device.is_none();

        if let Some(dev) = device {
            match (read, ss) {
                (_, 1) => {}
                (true, 2) => bytes[1] = dev.regs[usize::from(dev.pointer)],
                (false, 2) => dev.pointer = bytes[1],
                (true, _) => {
                    let stream = dev.stream(bytes[1], ss - 3);
                    bytes[3..].copy_from_slice(&stream);
                }
                (false, _) => dev.store(bytes[1], &bytes[2..]),
            }
        }

        for (i, req) in slots.iter().enumerate() {
            let mut resp = ResponseWord::from(0);
            resp.set_d(bytes[i]);
            resp.set_ti(req.ti());
            resp.set_ss(req.ss());

            if i == 0 {
                resp.set_ack_error(nack || fault == Some(Fault::Ack));
                match fault {
                    Some(Fault::Timeout) => resp.set_timeout_error(true),
                    Some(Fault::Conflict) => resp.set_bus_conflict_error(true),
                    Some(Fault::Flushed) => resp.set_flushed(true),
                    Some(Fault::BadTid) => resp.set_ti(req.ti() + 1),
                    _ => {}
                }
            }

            self.responses.push_back(resp.bits());
        }
    }

    fn control(&mut self, value: u32) {
        if ControlStatus::from(value).reset() {
            self.resets += 1;
            self.pending.clear();
            self.responses.clear();
            self.in_flight = false;
        }
        self.cs = value;
    }

    fn response(&mut self) -> u32 {
        match self.responses.pop_front() {
            Some(word) => {
                if self.responses.is_empty() && self.pending.is_empty() {
                    self.in_flight = false;
                }
                word
            }
            None => {
                let mut empty = ResponseWord::from(0);
                empty.set_fe(true);
                empty.bits()
            }
        }
    }
}

#[derive(Default)]
struct SimState {
    mem: BTreeMap<u32, u32>,
    masters: BTreeMap<u32, SimMaster>,
    writes: Vec<(u32, u32)>,
    delays: usize,
    delay_ms: u64,
}

enum Port {
    Request,
    Control,
    Response,
}

impl SimState {
    fn port(&mut self, offset: u32) -> Option<(&mut SimMaster, Port)> {
        self.masters.iter_mut().find_map(|(base, master)| {
            match offset.checked_sub(*base)? {
                REQ_OFFSET => Some((master, Port::Request)),
                CS_OFFSET => Some((master, Port::Control)),
                RESP_OFFSET => Some((master, Port::Response)),
                _ => None,
            }
        })
    }
}

#[derive(Default)]
pub struct SimRegisters {
    state: Mutex<SimState>,
}

impl SimRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Models an SMBus master whose registers start at `base`.
    pub fn add_master(&self, base: u32) {
        self.state().masters.entry(base).or_default();
    }

    /// Attaches a target at `addr` on `bus` of the master at `base`.
    pub fn add_device(&self, base: u32, bus: u8, addr: u8, device: SimDevice) {
        self.state()
            .masters
            .entry(base)
            .or_default()
            .devices
            .insert((bus, addr), device);
    }

    pub fn with_device<T>(
        &self,
        base: u32,
        bus: u8,
        addr: u8,
        f: impl FnOnce(&mut SimDevice) -> T,
    ) -> Option<T> {
        self.state()
            .masters
            .get_mut(&base)?
            .devices
            .get_mut(&(bus, addr))
            .map(f)
    }

    /// Makes the next `count` transactions on the master at `base` fail.
    pub fn inject(&self, base: u32, fault: Fault, count: usize) {
        let mut state = self.state();
        let master = state.masters.entry(base).or_default();
        master.faults.extend(std::iter::repeat(fault).take(count));
    }

    pub fn transactions(&self, base: u32) -> Vec<SimTransaction> {
        self.state()
            .masters
            .get(&base)
            .map(|m| m.log.clone())
            .unwrap_or_default()
    }

    pub fn resets(&self, base: u32) -> usize {
        self.state().masters.get(&base).map_or(0, |m| m.resets)
    }

    /// Transactions that started while another was still in flight on the
    /// same master.
    pub fn overlaps(&self, base: u32) -> usize {
        self.state().masters.get(&base).map_or(0, |m| m.overlaps)
    }

    /// Number of delays requested, and their total length in milliseconds.
    pub fn delays(&self) -> (usize, u64) {
        let state = self.state();
        (state.delays, state.delay_ms)
    }

    /// Reads plain memory without logging.
    pub fn peek(&self, offset: u32) -> u32 {
        self.state().mem.get(&offset).copied().unwrap_or(0)
    }

    /// Sets plain memory without logging.
    pub fn poke(&self, offset: u32, value: u32) {
        self.state().mem.insert(offset, value);
    }

    /// Every register write so far, in order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.state().writes.clone()
    }

    /// Forgets recorded writes, transactions, resets and delays.
    pub fn clear_log(&self) {
        let mut state = self.state();
        state.writes.clear();
        state.delays = 0;
        state.delay_ms = 0;
        for master in state.masters.values_mut() {
            master.log.clear();
            master.resets = 0;
        }
    }
}

impl Registers for SimRegisters {
    fn read(&self, offset: u32) -> u32 {
        let mut state = self.state();

        match state.port(offset) {
            Some((master, Port::Control)) => master.cs,
            Some((master, Port::Response)) => master.response(),
            Some((_, Port::Request)) => 0,
            None => state.mem.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write(&self, offset: u32, value: u32) {
        {
            let mut state = self.state();
            state.writes.push((offset, value));

            match state.port(offset) {
                Some((master, Port::Request)) => {
                    master.request(RequestWord::from(value))
                }
                Some((master, Port::Control)) => master.control(value),
                Some((_, Port::Response)) => {}
                None => {
                    state.mem.insert(offset, value);
                }
            }
        }

        // Give other threads a chance to interleave between FIFO writes.
        std::thread::yield_now();
    }

    fn delay_ms(&self, ms: u32) {
        let mut state = self.state();
        state.delays += 1;
        state.delay_ms += u64::from(ms);
    }
}
