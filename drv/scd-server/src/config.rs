// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board description files.
//!
//! A board file is TOML carrying the context options and the same objects
//! the topology lines describe:
//!
//! ```toml
//! name = "sw0"
//! res-size = 0x10000
//! lock = true
//!
//! [[master]]
//! addr = 0x8000
//! id = 0
//! bus-count = 4
//!
//! [[gpio]]
//! addr = 0x200
//! name = "fan1_led"
//! bit = 3
//! active-low = true
//!
//! [[tweak]]
//! bus = 2
//! addr = 0x50
//! t = 0
//! ```
//!
//! Entries become [`Command`] and [`Tweak`] values and go through the same
//! validation as text lines.  They are applied masters first, then LEDs,
//! GPIOs, resets, SFPs and QSFPs, then tweaks, each kind in file order.

use std::path::Path;

use anyhow::{anyhow, Context as _, Result};
use drv_scd_smbus::{BusParams, Registers};
use ringbuf::Level;
use serde::Deserialize;

use crate::command::{Command, Tweak, DEFAULT_BUS_COUNT};
use crate::{Context, ContextOptions};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Board {
    pub name: String,
    pub res_size: u32,
    #[serde(default)]
    pub adapter_base: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Lock the topology once everything is applied
    #[serde(default)]
    pub lock: bool,

    #[serde(default)]
    pub master: Vec<MasterConfig>,
    #[serde(default)]
    pub led: Vec<LedConfig>,
    #[serde(default)]
    pub gpio: Vec<GpioConfig>,
    #[serde(default)]
    pub reset: Vec<ResetConfig>,
    #[serde(default)]
    pub sfp: Vec<XcvrConfig>,
    #[serde(default)]
    pub qsfp: Vec<XcvrConfig>,
    #[serde(default)]
    pub tweak: Vec<TweakConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MasterConfig {
    pub addr: u32,
    pub id: u32,
    #[serde(default = "default_bus_count")]
    pub bus_count: u8,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LedConfig {
    pub addr: u32,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GpioConfig {
    pub addr: u32,
    pub name: String,
    pub bit: u8,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub active_low: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ResetConfig {
    pub addr: u32,
    pub name: String,
    pub bit: u8,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct XcvrConfig {
    pub addr: u32,
    pub id: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TweakConfig {
    /// Adapter number
    pub bus: u32,
    pub addr: u8,
    #[serde(default = "default_t")]
    pub t: u8,
    #[serde(default = "default_datr")]
    pub datr: u8,
    #[serde(default = "default_datw")]
    pub datw: u8,
}

fn default_max_retries() -> u32 {
    drv_scd_smbus::master::DEFAULT_MAX_RETRIES
}

fn default_log_level() -> String {
    Level::Warn.to_string()
}

fn default_bus_count() -> u8 {
    DEFAULT_BUS_COUNT
}

fn default_t() -> u8 {
    BusParams::DEFAULT.t
}

fn default_datr() -> u8 {
    BusParams::DEFAULT.datr
}

fn default_datw() -> u8 {
    BusParams::DEFAULT.datw
}

impl Board {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse board file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("in {}", path.display()))
    }

    pub fn options(&self) -> Result<ContextOptions> {
        let log_level = self
            .log_level
            .parse::<Level>()
            .map_err(|()| anyhow!("unknown log level {:?}", self.log_level))?;

        Ok(ContextOptions {
            name: self.name.clone(),
            res_size: self.res_size,
            adapter_base: self.adapter_base,
            max_retries: self.max_retries,
            log_level,
        })
    }

    /// Every object of the board, in application order.
    pub fn commands(&self) -> Vec<Command> {
        let masters = self.master.iter().map(|m| Command::Master {
            addr: m.addr,
            id: m.id,
            bus_count: m.bus_count,
        });
        let leds = self.led.iter().map(|l| Command::Led {
            addr: l.addr,
            name: l.name.clone(),
        });
        let gpios = self.gpio.iter().map(|g| Command::Gpio {
            addr: g.addr,
            name: g.name.clone(),
            bit: g.bit,
            read_only: g.read_only,
            active_low: g.active_low,
        });
        let resets = self.reset.iter().map(|r| Command::Reset {
            addr: r.addr,
            name: r.name.clone(),
            bit: r.bit,
        });
        let sfps = self.sfp.iter().map(|x| Command::Sfp {
            addr: x.addr,
            id: x.id,
        });
        let qsfps = self.qsfp.iter().map(|x| Command::Qsfp {
            addr: x.addr,
            id: x.id,
        });

        masters
            .chain(leds)
            .chain(gpios)
            .chain(resets)
            .chain(sfps)
            .chain(qsfps)
            .collect()
    }

    pub fn tweaks(&self) -> Result<Vec<Tweak>> {
        self.tweak
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Tweak::new(t.bus, t.addr, t.t, t.datr, t.datw)
                    .map_err(|code| anyhow!("tweak {i}: {code}"))
            })
            .collect()
    }

    /// Builds a context over `regs` and applies the whole board to it.
    pub fn instantiate<R: Registers>(&self, regs: R) -> Result<Context<R>> {
        let ctx = Context::new(std::sync::Arc::new(regs), self.options()?);
        self.apply(&ctx)?;
        Ok(ctx)
    }

    /// Applies the board to an existing context, stopping at the first
    /// entry that fails.
    pub fn apply<R: Registers>(&self, ctx: &Context<R>) -> Result<()> {
        for cmd in self.commands() {
            ctx.apply(&cmd).map_err(|code| {
                anyhow!(
                    "{} at {:#x}: {code}",
                    cmd.verb().name(),
                    cmd.addr()
                )
            })?;
        }

        for tweak in self.tweaks()? {
            ctx.apply_tweak(&tweak).map_err(|code| {
                anyhow!(
                    "tweak of {:#x} on adapter {}: {code}",
                    tweak.addr,
                    tweak.adapter
                )
            })?;
        }

        if self.lock {
            ctx.finish_init()
                .map_err(|code| anyhow!("failed to lock topology: {code}"))?;
        }

        Ok(())
    }
}
