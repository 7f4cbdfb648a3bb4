// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register words of an SCD SMBus master.
//!
//! Each master occupies a small window of the SCD register space; the three
//! registers below sit at fixed offsets from the master's base address.

use bitfield::bitfield;
use static_assertions::const_assert;

/// Request FIFO write port.
pub const REQ_OFFSET: u32 = 0x10;
/// Control/status register.
pub const CS_OFFSET: u32 = 0x20;
/// Response FIFO read port.
pub const RESP_OFFSET: u32 = 0x30;

/// What a response read is replaced with when the FIFO never fills.  Every
/// error flag is set, so it can never pass the response check.
pub const FIFO_EMPTY_SENTINEL: u32 = 0xffff_ffff;

/// Largest value of the `ss` field.
pub const MAX_SLOTS: u8 = 0x3f;

// The longest transaction, a block read of 32 bytes, must fit in `ss`.
const_assert!(4 + drv_scd_types::BLOCK_MAX <= MAX_SLOTS as usize);

bitfield! {
    /// One FIFO slot of a transaction.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct RequestWord(u32);
    impl Debug;
    /// Byte to put on the wire (address, command or payload)
    pub u8, d, set_d: 7, 0;
    /// Total number of slots in the transaction
    pub u8, ss, set_ss: 13, 8;
    pub ed, set_ed: 14;
    pub br, set_br: 15;
    /// FIFO drain selector, on the final slot
    pub u8, dat, set_dat: 17, 16;
    /// Clock rate selector
    pub u8, t, set_t: 19, 18;
    /// Stop after this slot
    pub sp, set_sp: 20;
    /// Acknowledge the received byte
    pub da, set_da: 21;
    /// Master drives SDA for this byte
    pub dod, set_dod: 22;
    /// Start (or repeated start) before this slot
    pub st, set_st: 23;
    /// Bus select
    pub u8, bs, set_bs: 27, 24;
    /// Slot index, echoed in the response
    pub u8, ti, set_ti: 31, 28;
}

bitfield! {
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ControlStatus(u32);
    impl Debug;
    /// Force output enable
    pub foe, set_foe: 13;
    pub reset, set_reset: 31;
}

bitfield! {
    /// One response FIFO entry; the master produces one per request slot.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ResponseWord(u32);
    impl Debug;
    /// Byte seen on the wire
    pub u8, d, set_d: 7, 0;
    pub bus_conflict_error, set_bus_conflict_error: 8;
    pub timeout_error, set_timeout_error: 9;
    pub ack_error, set_ack_error: 10;
    pub flushed, set_flushed: 11;
    pub u8, ti, set_ti: 15, 12;
    pub u8, ss, set_ss: 21, 16;
    /// The FIFO had nothing to give
    pub fe, set_fe: 31;
}

impl RequestWord {
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for RequestWord {
    fn from(word: u32) -> Self {
        Self(word)
    }
}

impl ControlStatus {
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ControlStatus {
    fn from(word: u32) -> Self {
        Self(word)
    }
}

impl ResponseWord {
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ResponseWord {
    fn from(word: u32) -> Self {
        Self(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_positions() {
        let mut req = RequestWord(0);
        req.set_d(0xa0);
        assert_eq!(req.bits(), 0x0000_00a0);

        let mut req = RequestWord(0);
        req.set_ss(0x3f);
        assert_eq!(req.bits(), 0x0000_3f00);

        let mut req = RequestWord(0);
        req.set_dat(3);
        req.set_t(1);
        assert_eq!(req.bits(), 0x0007_0000);

        let mut req = RequestWord(0);
        req.set_sp(true);
        req.set_da(true);
        req.set_dod(true);
        req.set_st(true);
        assert_eq!(req.bits(), 0x00f0_0000);

        let mut req = RequestWord(0);
        req.set_bs(0x5);
        req.set_ti(0xc);
        assert_eq!(req.bits(), 0xc500_0000);
    }

    #[test]
    fn oversized_fields_are_masked() {
        let mut req = RequestWord(0);
        req.set_ti(0x13);
        assert_eq!(req.ti(), 0x3);
        assert_eq!(req.bs(), 0);
    }

    #[test]
    fn control_status_positions() {
        let mut cs = ControlStatus(0);
        cs.set_foe(true);
        assert_eq!(cs.bits(), 1 << 13);
        cs.set_reset(true);
        assert_eq!(cs.bits(), (1 << 13) | (1 << 31));
    }

    #[test]
    fn response_positions() {
        let resp = ResponseWord(0x0004_5842);
        assert_eq!(resp.d(), 0x42);
        assert!(!resp.bus_conflict_error());
        assert!(!resp.timeout_error());
        assert!(!resp.ack_error());
        assert!(resp.flushed());
        assert_eq!(resp.ti(), 0x5);
        assert_eq!(resp.ss(), 0x4);
        assert!(!resp.fe());

        let resp = ResponseWord(0x0000_0700);
        assert!(resp.bus_conflict_error());
        assert!(resp.timeout_error());
        assert!(resp.ack_error());

        let sentinel = ResponseWord(FIFO_EMPTY_SENTINEL);
        assert!(sentinel.fe());
        assert!(sentinel.ack_error());
    }
}
