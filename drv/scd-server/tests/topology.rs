// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use drv_scd_server::command::Verb;
use drv_scd_server::{Board, Context, ContextOptions};
use drv_scd_smbus::sim::{SimDevice, SimRegisters};
use drv_scd_smbus::BusParams;
use drv_scd_types::ResponseCode;
use proptest::prelude::*;

const RES_SIZE: u32 = 0x10000;

fn context() -> Context<SimRegisters> {
    let regs = Arc::new(SimRegisters::new());
    regs.add_master(0x1000);
    regs.add_master(0x8000);
    Context::new(regs, ContextOptions::new("test", RES_SIZE))
}

#[test]
fn duplicate_master_keeps_first() {
    let ctx = context();

    ctx.new_master("0x1000 0 8").unwrap();
    assert_eq!(
        ctx.new_master("0x1000 0 4"),
        Err(ResponseCode::AlreadyExists)
    );

    let topo = ctx.topology();
    assert_eq!(topo.masters.len(), 1);
    assert_eq!(topo.masters[0].buses.len(), 8);

    // The rejected master never touched the hardware.
    assert_eq!(ctx.regs().resets(0x1000), 1);
}

#[test]
fn lines_fail_fast() {
    let ctx = context();

    let buf = "led 0x100 a\nled 0x104 b\nled 0x100 c\nled 0x108 d\n";
    assert_eq!(ctx.new_object(buf), Err(ResponseCode::AlreadyExists));

    let names: Vec<String> =
        ctx.topology().leds.into_iter().map(|l| l.name).collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn lock_boundary() {
    let ctx = context();
    ctx.new_object(
        "master 0x8000 0 2\n\
         gpio 0x200 fan1_led 3 0 1\n\
         reset 0x4000 asic_reset 0\n\
         led 0x6050 status\n",
    )
    .unwrap();
    ctx.tweak("0 0x50 0 2 2").unwrap();

    assert!(ctx.adapter(0).is_none());
    ctx.finish_init().unwrap();
    assert_eq!(ctx.init_error(), 0);

    let before = ctx.topology();
    assert!(before.initialized);

    let attempts = [
        ctx.new_object("master 0x1000 1"),
        ctx.new_master("0x1000 1"),
        ctx.new_led("0x6060 fault"),
        ctx.new_gpio("0x300 late 0 0 0"),
        ctx.new_reset("0x4000 late_reset 1"),
        ctx.new_sfp("0xa000 0"),
        ctx.new_qsfp("0xa010 0"),
        ctx.tweak("0 0x50 1 1 1"),
    ];
    for rval in attempts {
        assert_eq!(rval, Err(ResponseCode::Busy));
    }

    assert_eq!(ctx.topology(), before);

    // Locking again is harmless.
    ctx.finish_init().unwrap();
    assert_eq!(ctx.adapters().len(), 2);
    assert!(ctx.adapter(1).is_some());
    assert!(ctx.adapter(2).is_none());
}

#[test]
fn gpio_active_low_scenario() {
    let ctx = context();
    ctx.new_object("gpio 0x200 fan1_led 3 0 1").unwrap();

    for raw in [0u32, 0xffff_ffff] {
        ctx.regs().poke(0x200, raw);
        ctx.set_gpio("fan1_led", true).unwrap();
        assert_eq!(ctx.gpio("fan1_led"), Ok(true));
        assert_eq!(ctx.show_attr("fan1_led").unwrap(), "1\n");
    }

    ctx.store_attr("fan1_led", "0\n").unwrap();
    assert_eq!(ctx.regs().peek(0x200) & (1 << 3), 1 << 3);
    assert_eq!(ctx.show_attr("fan1_led").unwrap(), "0\n");

    // Any non-zero value turns a GPIO on.
    ctx.store_attr("fan1_led", "0x20").unwrap();
    assert_eq!(ctx.gpio("fan1_led"), Ok(true));
}

#[test]
fn read_only_gpios() {
    let ctx = context();
    ctx.new_qsfp("0xa010 3").unwrap();

    assert_eq!(
        ctx.store_attr("qsfp3_present", "1"),
        Err(ResponseCode::ReadOnly)
    );

    // Present is active-low: a clear bit reads as present.
    assert_eq!(ctx.gpio("qsfp3_present"), Ok(true));
    ctx.set_gpio("qsfp3_lp_mode", true).unwrap();
    assert_eq!(ctx.regs().peek(0xa010), 1 << 6);
}

#[test]
fn reset_set_clear() {
    let ctx = context();
    ctx.new_reset("0x4000 asic_reset 5").unwrap();

    let start = ctx.regs().writes().len();
    ctx.store_attr("asic_reset", "1").unwrap();
    ctx.store_attr("asic_reset", "0\n").unwrap();

    let writes = ctx.regs().writes();
    assert_eq!(&writes[start..], [(0x4000, 1 << 5), (0x4010, 1 << 5)]);

    assert_eq!(ctx.store_attr("asic_reset", "2"), Err(ResponseCode::BadArg));
    assert_eq!(ctx.show_attr("nope"), Err(ResponseCode::NoAttribute));
}

#[test]
fn led_brightness() {
    let ctx = context();
    ctx.new_led("0x6050 status").unwrap();

    assert_eq!(ctx.show_brightness("status").unwrap(), "0\n");
    ctx.store_brightness("status", "2\n").unwrap();
    assert_eq!(ctx.regs().peek(0x6050), 0x0806_ff00);
    assert_eq!(ctx.brightness("status"), Ok(2));
    assert_eq!(ctx.topology().leds[0].brightness, 2);
}

#[test]
fn tweak_last_write_wins() {
    let ctx = context();
    ctx.new_master("0x8000 0 4").unwrap();

    ctx.tweak("2 0x50 2 1 0\n2 0x50 0 2 1").unwrap();
    ctx.tweak("2 0x51 3 3 3").unwrap();

    let bus = &ctx.topology().masters[0].buses[2];
    assert_eq!(
        bus.tweaks,
        [
            (0x50, BusParams::new(0, 2, 1).unwrap()),
            (0x51, BusParams::new(3, 3, 3).unwrap()),
        ]
    );

    assert_eq!(ctx.tweak("9 0x50 0 0 0"), Err(ResponseCode::NoBus));
    assert_eq!(ctx.tweak("2 0x50 0 0"), Err(ResponseCode::BadArg));
}

#[test]
fn res_size_boundary() {
    let ctx = context();

    ctx.new_led(&format!("{RES_SIZE} at_end")).unwrap();
    assert_eq!(
        ctx.new_led(&format!("{} past_end", RES_SIZE + 1)),
        Err(ResponseCode::AddressOutOfRange)
    );
    assert_eq!(
        ResponseCode::AddressOutOfRange.errno(),
        ResponseCode::BadArg.errno()
    );
}

#[test]
fn register_windows_fit_the_address_space() {
    let regs = Arc::new(SimRegisters::new());
    let ctx = Context::new(regs, ContextOptions::new("top", u32::MAX));

    // A master's response FIFO sits 0x30 above its base.
    assert_eq!(
        ctx.new_master("0xffffffe0 0 1"),
        Err(ResponseCode::AddressOutOfRange)
    );
    assert!(ctx.topology().masters.is_empty());
    assert!(ctx.regs().writes().is_empty());

    ctx.new_master("0xffffffcf 0 1").unwrap();
    assert_eq!(ctx.topology().masters[0].base, 0xffff_ffcf);

    // A reset's clear register sits 0x10 above its address.
    assert_eq!(
        ctx.new_reset("0xfffffff8 r 0"),
        Err(ResponseCode::AddressOutOfRange)
    );
    assert_eq!(ctx.show_attr("r"), Err(ResponseCode::NoAttribute));

    ctx.new_reset("0xffffffef r 0").unwrap();
    ctx.store_attr("r", "0").unwrap();
    assert_eq!(ctx.regs().writes().last(), Some(&(0xffff_ffff, 1)));

    // Descriptors without an offset may use the very last register.
    ctx.new_gpio("0xffffffff g 31 0 0").unwrap();
    ctx.set_gpio("g", true).unwrap();
    assert_eq!(ctx.gpio("g"), Ok(true));
    assert_eq!(ctx.regs().peek(0xffff_ffff), (1 << 31) | 1);
}

#[test]
fn published_adapter_transacts() {
    let ctx = context();
    ctx.regs().add_device(
        0x8000,
        1,
        0x50,
        SimDevice::default().with_block(0x10, b"SCD"),
    );

    ctx.new_master("0x8000 0 2").unwrap();
    ctx.finish_init().unwrap();

    let bus = ctx.adapter(1).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(bus.read_block_data(0x50, 0x10, &mut buf), Ok(3));
    assert_eq!(&buf[..3], b"SCD");

    // Nothing lives on the other bus.
    let other = ctx.adapter(0).unwrap();
    assert_eq!(other.read_byte(0x50), Err(ResponseCode::AckError));

    // Handles outlive the context.
    drop(ctx);
    assert_eq!(bus.read_block_data(0x50, 0x10, &mut buf), Ok(3));
}

#[test]
fn per_verb_surfaces_reject_verbs() {
    let ctx = context();
    assert_eq!(ctx.new_led("led 0x100 a"), Err(ResponseCode::BadArg));
    assert_eq!(ctx.new_objects(Verb::Led, "0x100 a\n\n0x104 b"), Ok(()));
    assert_eq!(ctx.topology().leds.len(), 2);
}

#[test]
fn board_file() {
    let text = r#"
name = "sw0"
res-size = 0x10000
lock = true

[[master]]
addr = 0x8000
id = 0
bus-count = 2

[[reset]]
addr = 0x4000
name = "asic_reset"
bit = 0

[[sfp]]
addr = 0xa000
id = 1

[[tweak]]
bus = 1
addr = 0x50
datw = 1
"#;

    let regs = SimRegisters::new();
    regs.add_master(0x8000);

    let board = Board::from_toml(text).unwrap();
    let ctx = board.instantiate(regs).unwrap();

    let topo = ctx.topology();
    assert!(topo.initialized);
    assert_eq!(topo.masters[0].buses.len(), 2);
    assert_eq!(topo.resets.len(), 1);
    assert_eq!(topo.gpios.len(), 9);
    assert_eq!(
        topo.masters[0].buses[1].tweaks,
        [(0x50, BusParams::new(1, 3, 1).unwrap())]
    );
    assert_eq!(ctx.adapters().len(), 2);
}

#[test]
fn board_errors_name_the_entry() {
    let text = r#"
name = "sw0"
res-size = 0x100

[[led]]
addr = 0x200
name = "status"
"#;

    let board = Board::from_toml(text).unwrap();
    let err = board.instantiate(SimRegisters::new()).err().unwrap();
    assert!(err.to_string().starts_with("led at 0x200"), "{err}");
}

proptest! {
    #[test]
    fn addresses_bounded_by_res_size(addr in 0u32..0x20000) {
        let ctx = context();
        let rval = ctx.new_reset(&format!("{addr:#x} r 0"));

        if addr <= RES_SIZE {
            prop_assert_eq!(rval, Ok(()));
        } else {
            prop_assert_eq!(rval, Err(ResponseCode::AddressOutOfRange));
            prop_assert!(ctx.topology().resets.is_empty());
        }
    }
}
