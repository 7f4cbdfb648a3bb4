// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use drv_scd_server::command::{self, Command};
use drv_scd_server::{Board, Context, ContextOptions, Topology};
use drv_scd_smbus::master::DEFAULT_MAX_RETRIES;
use drv_scd_smbus::sim::SimRegisters;
use ringbuf::{Level, RingbufEntry};

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "Check an SCD topology against a simulated device"
)]
struct Args {
    /// Print the trace logs after applying
    #[clap(long)]
    trace: bool,
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Apply a script of topology lines; `tweak` lines go to the tweak
    /// surface
    Script {
        file: PathBuf,
        #[clap(long, default_value = "scd")]
        name: String,
        /// Highest usable register address
        #[clap(
            long,
            parse(try_from_str = parse_int::parse),
            default_value_t = 0x10000
        )]
        res_size: u32,
        #[clap(
            long,
            parse(try_from_str = parse_int::parse),
            default_value_t = 0
        )]
        adapter_base: u32,
        #[clap(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
        #[clap(
            long,
            parse(try_from_str = parse_level),
            default_value = "debug"
        )]
        log_level: Level,
        /// Lock the topology after the script
        #[clap(long)]
        lock: bool,
    },
    /// Apply a TOML board file
    Board { file: PathBuf },
}

fn parse_level(s: &str) -> Result<Level> {
    s.parse().map_err(|()| anyhow!("unknown log level {s:?}"))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
}

///
/// Every SMBus master named by a script, so the simulator can model its
/// FIFOs.  Lines that don't parse are left for the context to reject.
///
fn script_masters(text: &str) -> Vec<u32> {
    command::lines(text)
        .filter_map(|l| Command::parse(l).ok())
        .filter_map(|c| match c {
            Command::Master { addr, .. } => Some(addr),
            _ => None,
        })
        .collect()
}

fn run_script(
    text: &str,
    opts: ContextOptions,
    lock: bool,
) -> Result<Context<SimRegisters>> {
    let regs = SimRegisters::new();
    for base in script_masters(text) {
        regs.add_master(base);
    }

    let ctx = Context::new(Arc::new(regs), opts);

    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let rval = match line.strip_prefix("tweak ") {
            Some(args) => ctx.tweak(args),
            None => ctx.new_object(line),
        };
        rval.map_err(|code| anyhow!("line {}: {line:?}: {code}", n + 1))?;
    }

    if lock {
        ctx.finish_init()
            .map_err(|code| anyhow!("failed to lock topology: {code}"))?;
    }

    Ok(ctx)
}

fn run_board(text: &str) -> Result<Context<SimRegisters>> {
    let board = Board::from_toml(text)?;

    let regs = SimRegisters::new();
    for master in &board.master {
        regs.add_master(master.addr);
    }

    board.instantiate(regs)
}

fn print_topology(topo: &Topology) {
    println!("locked: {}", if topo.initialized { "yes" } else { "no" });

    for master in &topo.masters {
        println!("master {} at {:#x}", master.id, master.base);
        for bus in &master.buses {
            println!("  adapter {:3}  {}", bus.adapter, bus.name);
            for (addr, p) in &bus.tweaks {
                println!(
                    "    {addr:#04x}: t={} datr={} datw={}",
                    p.t, p.datr, p.datw
                );
            }
        }
    }

    for led in &topo.leds {
        println!("led {:#06x} {}", led.addr, led.name);
    }

    for gpio in &topo.gpios {
        println!(
            "gpio {:#06x} bit {:2} {} {}{}",
            gpio.addr,
            gpio.bit,
            gpio.name,
            if gpio.read_only { "ro" } else { "rw" },
            if gpio.active_low { " active-low" } else { "" },
        );
    }

    for reset in &topo.resets {
        println!(
            "reset {:#06x} bit {:2} {}",
            reset.addr, reset.bit, reset.name
        );
    }
}

fn print_trace<T: Copy + PartialEq + Debug>(
    title: &str,
    entries: &[RingbufEntry<T>],
) {
    println!("{title}:");
    for e in entries {
        println!(
            "{:5} {:4} {:5} {:?}",
            e.line,
            e.count,
            e.level.to_string(),
            e.payload
        );
    }
}

pub fn main() -> Result<()> {
    let args = Args::parse();

    let ctx = match &args.cmd {
        Cmd::Script {
            file,
            name,
            res_size,
            adapter_base,
            max_retries,
            log_level,
            lock,
        } => {
            let opts = ContextOptions {
                name: name.clone(),
                res_size: *res_size,
                adapter_base: *adapter_base,
                max_retries: *max_retries,
                log_level: *log_level,
            };
            run_script(&read(file)?, opts, *lock)
                .with_context(|| format!("in {}", file.display()))?
        }
        Cmd::Board { file } => run_board(&read(file)?)
            .with_context(|| format!("in {}", file.display()))?,
    };

    print_topology(&ctx.topology());

    if args.trace {
        print_trace("context", &ctx.trace().snapshot());
        print_trace("smbus", &ctx.smbus_trace().snapshot());
    }

    Ok(())
}
