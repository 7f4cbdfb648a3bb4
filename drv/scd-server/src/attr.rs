// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GPIO, reset and LED descriptors.
//!
//! Each descriptor names one bit (or, for LEDs, one whole register) of the
//! SCD register space and knows how to read and write it.  Descriptors hold
//! no cached hardware state except an LED's last brightness.

use std::sync::atomic::{AtomicU32, Ordering};

use drv_scd_smbus::Registers;
use drv_scd_types::ResponseCode;

use crate::command::parse_number;

/// Offset of the write-1-to-set register of a reset bank.
pub const RESET_SET_OFFSET: u32 = 0x00;
/// Offset of the write-1-to-clear register of a reset bank.
pub const RESET_CLEAR_OFFSET: u32 = 0x10;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Gpio {
    pub addr: u32,
    pub bit: u8,
    pub read_only: bool,
    pub active_low: bool,
    pub name: String,
}

impl Gpio {
    fn mask(&self) -> u32 {
        1 << self.bit
    }

    /// Logical value: the raw bit, inverted for active-low lines.
    pub fn get<R: Registers>(&self, regs: &R) -> bool {
        (regs.read(self.addr) & self.mask() != 0) ^ self.active_low
    }

    ///
    /// Sets the logical value with a read-modify-write of the whole register.
    /// Two GPIOs sharing a register are not protected from each other.
    ///
    pub fn set<R: Registers>(
        &self,
        regs: &R,
        value: bool,
    ) -> Result<(), ResponseCode> {
        if self.read_only {
            return Err(ResponseCode::ReadOnly);
        }

        let mut reg = regs.read(self.addr);
        if value ^ self.active_low {
            reg |= self.mask();
        } else {
            reg &= !self.mask();
        }
        regs.write(self.addr, reg);
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reset {
    pub addr: u32,
    pub bit: u8,
    pub name: String,
}

impl Reset {
    fn mask(&self) -> u32 {
        1 << self.bit
    }

    pub fn get<R: Registers>(&self, regs: &R) -> bool {
        regs.read(self.addr) & self.mask() != 0
    }

    /// Asserts or releases through the set/clear pair; no other bit of the
    /// bank is touched.
    pub fn set<R: Registers>(&self, regs: &R, value: bool) {
        let offset = if value {
            RESET_SET_OFFSET
        } else {
            RESET_CLEAR_OFFSET
        };
        regs.write(self.addr + offset, self.mask());
    }
}

/// LED register word for a brightness value.
pub fn led_word(brightness: u32) -> u32 {
    match brightness {
        0 => 0x0006_ff00, // off
        1 => 0x1006_ff00, // green
        2 => 0x0806_ff00, // red
        3 => 0x1806_ff00, // yellow
        4 => 0x1406_ff00,
        5 => 0x0c06_ff00,
        6 => 0x1c06_ff00,
        _ => 0x1806_ff00,
    }
}

#[derive(Debug)]
pub struct Led {
    pub addr: u32,
    pub name: String,
    brightness: AtomicU32,
}

impl Led {
    pub fn new(addr: u32, name: String) -> Self {
        Self {
            addr,
            name,
            brightness: AtomicU32::new(0),
        }
    }

    /// The last brightness set.
    pub fn brightness(&self) -> u32 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn set_brightness<R: Registers>(&self, regs: &R, brightness: u32) {
        regs.write(self.addr, led_word(brightness));
        self.brightness.store(brightness, Ordering::Relaxed);
    }
}

/// One fixed bit of a transceiver's status/control register.
#[derive(Copy, Clone, Debug)]
pub struct XcvrBit {
    pub bit: u8,
    pub read_only: bool,
    pub active_low: bool,
    pub suffix: &'static str,
}

const fn xcvr(
    bit: u8,
    read_only: bool,
    active_low: bool,
    suffix: &'static str,
) -> XcvrBit {
    XcvrBit {
        bit,
        read_only,
        active_low,
        suffix,
    }
}

pub const SFP_BITS: [XcvrBit; 9] = [
    xcvr(0, true, false, "rxlos"),
    xcvr(1, true, false, "txfault"),
    xcvr(2, true, true, "present"),
    xcvr(3, true, false, "rxlos_changed"),
    xcvr(4, true, false, "txfault_changed"),
    xcvr(5, true, false, "present_changed"),
    xcvr(6, false, false, "txdisable"),
    xcvr(7, false, false, "rate_select0"),
    xcvr(8, false, false, "rate_select1"),
];

pub const QSFP_BITS: [XcvrBit; 7] = [
    xcvr(0, true, true, "interrupt"),
    xcvr(2, true, true, "present"),
    xcvr(3, true, false, "interrupt_changed"),
    xcvr(5, true, false, "present_changed"),
    xcvr(6, false, false, "lp_mode"),
    xcvr(7, false, false, "reset"),
    xcvr(8, false, true, "modsel"),
];

/// The GPIOs a transceiver line expands to, named `{prefix}{id}_{suffix}`.
pub fn xcvr_gpios(
    prefix: &str,
    table: &[XcvrBit],
    addr: u32,
    id: u32,
) -> Vec<Gpio> {
    table
        .iter()
        .map(|b| Gpio {
            addr,
            bit: b.bit,
            read_only: b.read_only,
            active_low: b.active_low,
            name: format!("{prefix}{id}_{}", b.suffix),
        })
        .collect()
}

/// Text form of an attribute value.
pub fn show(value: u32) -> String {
    format!("{value}\n")
}

/// Parses a written attribute value; one trailing newline is allowed.
pub fn parse_store(buf: &str) -> Result<u32, ResponseCode> {
    let buf = buf.strip_suffix('\n').unwrap_or(buf);
    parse_number(buf.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_scd_smbus::sim::SimRegisters;

    #[test]
    fn active_low_gpio() {
        let regs = SimRegisters::new();
        let gpio = Gpio {
            addr: 0x200,
            bit: 3,
            read_only: false,
            active_low: true,
            name: "fan1_led".to_string(),
        };

        // Raw 0 reads as asserted.
        assert!(gpio.get(&regs));

        gpio.set(&regs, false).unwrap();
        assert_eq!(regs.peek(0x200), 1 << 3);
        assert!(!gpio.get(&regs));

        gpio.set(&regs, true).unwrap();
        assert_eq!(regs.peek(0x200), 0);
        assert!(gpio.get(&regs));
    }

    #[test]
    fn gpio_preserves_other_bits() {
        let regs = SimRegisters::new();
        regs.poke(0x300, 0xf0f0_0000);

        let gpio = Gpio {
            addr: 0x300,
            bit: 0,
            read_only: false,
            active_low: false,
            name: "g".to_string(),
        };
        gpio.set(&regs, true).unwrap();
        assert_eq!(regs.peek(0x300), 0xf0f0_0001);
    }

    #[test]
    fn read_only_gpio() {
        let regs = SimRegisters::new();
        let gpio = Gpio {
            addr: 0x200,
            bit: 0,
            read_only: true,
            active_low: false,
            name: "ro".to_string(),
        };
        assert_eq!(gpio.set(&regs, true), Err(ResponseCode::ReadOnly));
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn reset_uses_set_clear() {
        let regs = SimRegisters::new();
        let reset = Reset {
            addr: 0x4000,
            bit: 2,
            name: "switch_reset".to_string(),
        };

        reset.set(&regs, true);
        reset.set(&regs, false);
        assert_eq!(regs.writes(), [(0x4000, 0x4), (0x4010, 0x4)]);

        regs.poke(0x4000, 0x4);
        assert!(reset.get(&regs));
    }

    #[test]
    fn led_words() {
        let regs = SimRegisters::new();
        let led = Led::new(0x6050, "status".to_string());
        assert_eq!(led.brightness(), 0);

        led.set_brightness(&regs, 1);
        assert_eq!(regs.peek(0x6050), 0x1006_ff00);
        assert_eq!(led.brightness(), 1);

        led.set_brightness(&regs, 42);
        assert_eq!(regs.peek(0x6050), 0x1806_ff00);
        assert_eq!(led.brightness(), 42);
    }

    #[test]
    fn xcvr_names() {
        let gpios = xcvr_gpios("qsfp", &QSFP_BITS, 0xa010, 5);
        assert_eq!(gpios.len(), 7);
        assert_eq!(gpios[0].name, "qsfp5_interrupt");
        assert!(gpios[0].active_low && gpios[0].read_only);
        assert_eq!(gpios[6].name, "qsfp5_modsel");
        assert_eq!(gpios[6].bit, 8);
        assert!(gpios[6].active_low && !gpios[6].read_only);

        let gpios = xcvr_gpios("sfp", &SFP_BITS, 0xa000, 1);
        assert_eq!(gpios[2].name, "sfp1_present");
        assert!(gpios.iter().all(|g| g.addr == 0xa000));
    }

    fn rows(table: &[XcvrBit]) -> Vec<(u8, bool, bool, &'static str)> {
        table
            .iter()
            .map(|b| (b.bit, b.read_only, b.active_low, b.suffix))
            .collect()
    }

    #[test]
    fn sfp_table() {
        assert_eq!(
            rows(&SFP_BITS),
            [
                (0, true, false, "rxlos"),
                (1, true, false, "txfault"),
                (2, true, true, "present"),
                (3, true, false, "rxlos_changed"),
                (4, true, false, "txfault_changed"),
                (5, true, false, "present_changed"),
                (6, false, false, "txdisable"),
                (7, false, false, "rate_select0"),
                (8, false, false, "rate_select1"),
            ]
        );
    }

    #[test]
    fn qsfp_table() {
        assert_eq!(
            rows(&QSFP_BITS),
            [
                (0, true, true, "interrupt"),
                (2, true, true, "present"),
                (3, true, false, "interrupt_changed"),
                (5, true, false, "present_changed"),
                (6, false, false, "lp_mode"),
                (7, false, false, "reset"),
                (8, false, true, "modsel"),
            ]
        );
    }

    #[test]
    fn text_values() {
        assert_eq!(show(1), "1\n");
        assert_eq!(parse_store("1\n"), Ok(1));
        assert_eq!(parse_store("0x10"), Ok(16));
        assert_eq!(parse_store("one"), Err(ResponseCode::BadArg));
    }
}
