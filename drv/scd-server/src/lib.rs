// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The control plane of one SCD.
//!
//! A [`Context`] starts out empty and unlocked.  Userspace describes the
//! board by writing topology lines (see [`command`]): SMBus masters and
//! their buses, LEDs, GPIOs, resets, and transceiver GPIO banks, plus
//! per-target bus parameter tweaks.  Once the description is complete it
//! calls [`Context::finish_init`], which freezes the registry and publishes
//! every bus as an adapter.  Until then the device is inert: no adapter can
//! be looked up, so no transaction can be issued from outside.
//!
//! The context lock guards only the registry.  Transactions run on the
//! masters' own locks and never take the context lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use drv_scd_smbus::regs::RESP_OFFSET;
use drv_scd_smbus::{BusParams, Registers, SmbusBus, SmbusLog, SmbusMaster};
use drv_scd_types::ResponseCode;
use indexmap::IndexMap;
use ringbuf::{ringbuf_entry, Level, TraceLog};

pub mod attr;
pub mod command;
pub mod config;

use attr::{Gpio, Led, Reset, QSFP_BITS, RESET_CLEAR_OFFSET, SFP_BITS};
use command::{Command, Tweak, Verb};

pub use config::Board;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    Applied {
        verb: Verb,
        addr: u32,
    },
    Rejected {
        verb: Verb,
        code: ResponseCode,
    },
    BadLine {
        code: ResponseCode,
    },
    MasterAdded {
        id: u32,
        base: u32,
        buses: u8,
    },
    Tweaked {
        adapter: u32,
        addr: u8,
    },
    TweakRejected {
        code: ResponseCode,
    },
    Locked {
        adapters: u32,
    },
    LockFailed {
        code: ResponseCode,
    },
}

pub type ContextLog = TraceLog<Trace, 64>;

/// Settings fixed for the life of a context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContextOptions {
    /// Device name, used in adapter names
    pub name: String,
    /// Highest register address any descriptor may use
    pub res_size: u32,
    /// Adapter number of the first bus created
    pub adapter_base: u32,
    /// Attempts made per SMBus transaction
    pub max_retries: u32,
    pub log_level: Level,
}

impl ContextOptions {
    pub fn new(name: impl Into<String>, res_size: u32) -> Self {
        Self {
            name: name.into(),
            res_size,
            adapter_base: 0,
            max_retries: drv_scd_smbus::master::DEFAULT_MAX_RETRIES,
            log_level: Level::Warn,
        }
    }
}

struct MasterEntry<R: Registers> {
    master: Arc<SmbusMaster<R>>,
    buses: Vec<Arc<SmbusBus<R>>>,
}

struct Registry<R: Registers> {
    initialized: bool,
    init_error: u32,
    next_adapter: u32,
    masters: IndexMap<u32, MasterEntry<R>>,
    leds: IndexMap<u32, Arc<Led>>,
    gpios: IndexMap<String, Gpio>,
    resets: IndexMap<String, Reset>,
    adapters: IndexMap<u32, Arc<SmbusBus<R>>>,
}

impl<R: Registers> Registry<R> {
    fn name_taken(&self, name: &str) -> bool {
        self.gpios.contains_key(name) || self.resets.contains_key(name)
    }

    fn bus(&self, adapter: u32) -> Option<&Arc<SmbusBus<R>>> {
        self.masters
            .values()
            .flat_map(|m| m.buses.iter())
            .find(|b| b.adapter_nr() == adapter)
    }
}

/// A read-only copy of the registry, in registration order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    pub initialized: bool,
    pub masters: Vec<MasterInfo>,
    pub leds: Vec<LedInfo>,
    pub gpios: Vec<Gpio>,
    pub resets: Vec<Reset>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MasterInfo {
    pub id: u32,
    pub base: u32,
    pub buses: Vec<BusInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusInfo {
    pub id: u8,
    pub adapter: u32,
    pub name: String,
    pub tweaks: Vec<(u8, BusParams)>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedInfo {
    pub addr: u32,
    pub name: String,
    pub brightness: u32,
}

pub struct Context<R: Registers> {
    regs: Arc<R>,
    opts: ContextOptions,
    trace: Arc<ContextLog>,
    smbus_trace: Arc<SmbusLog>,
    registry: Mutex<Registry<R>>,
}

impl<R: Registers> Context<R> {
    pub fn new(regs: Arc<R>, opts: ContextOptions) -> Self {
        Self {
            trace: Arc::new(ContextLog::new(opts.log_level)),
            smbus_trace: Arc::new(SmbusLog::new(opts.log_level)),
            registry: Mutex::new(Registry {
                initialized: false,
                init_error: 0,
                next_adapter: opts.adapter_base,
                masters: IndexMap::new(),
                leds: IndexMap::new(),
                gpios: IndexMap::new(),
                resets: IndexMap::new(),
                adapters: IndexMap::new(),
            }),
            regs,
            opts,
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.opts
    }

    pub fn regs(&self) -> &Arc<R> {
        &self.regs
    }

    pub fn trace(&self) -> &ContextLog {
        &self.trace
    }

    pub fn smbus_trace(&self) -> &SmbusLog {
        &self.smbus_trace
    }

    fn registry(&self) -> MutexGuard<'_, Registry<R>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    ///
    /// Applies a buffer of verb-prefixed topology lines.  Lines are applied
    /// in order and the first failure stops the write; lines before it stay
    /// applied.
    ///
    pub fn new_object(&self, buf: &str) -> Result<(), ResponseCode> {
        for line in command::lines(buf) {
            let cmd = Command::parse(line).inspect_err(|&code| {
                ringbuf_entry!(
                    self.trace,
                    Level::Warn,
                    Trace::BadLine { code }
                );
            })?;
            self.apply(&cmd)?;
        }
        Ok(())
    }

    /// Applies a buffer of argument-only lines, all of the given kind.
    pub fn new_objects(
        &self,
        verb: Verb,
        buf: &str,
    ) -> Result<(), ResponseCode> {
        for line in command::lines(buf) {
            let cmd = Command::parse_args(verb, line).inspect_err(|&code| {
                ringbuf_entry!(
                    self.trace,
                    Level::Warn,
                    Trace::Rejected { verb, code }
                );
            })?;
            self.apply(&cmd)?;
        }
        Ok(())
    }

    pub fn new_master(&self, buf: &str) -> Result<(), ResponseCode> {
        self.new_objects(Verb::Master, buf)
    }

    pub fn new_led(&self, buf: &str) -> Result<(), ResponseCode> {
        self.new_objects(Verb::Led, buf)
    }

    pub fn new_gpio(&self, buf: &str) -> Result<(), ResponseCode> {
        self.new_objects(Verb::Gpio, buf)
    }

    pub fn new_reset(&self, buf: &str) -> Result<(), ResponseCode> {
        self.new_objects(Verb::Reset, buf)
    }

    pub fn new_sfp(&self, buf: &str) -> Result<(), ResponseCode> {
        self.new_objects(Verb::Sfp, buf)
    }

    pub fn new_qsfp(&self, buf: &str) -> Result<(), ResponseCode> {
        self.new_objects(Verb::Qsfp, buf)
    }

    /// Applies a buffer of tweak lines, failing fast like the topology
    /// surfaces.
    pub fn tweak(&self, buf: &str) -> Result<(), ResponseCode> {
        for line in command::lines(buf) {
            let tweak = Tweak::parse(line).inspect_err(|&code| {
                ringbuf_entry!(
                    self.trace,
                    Level::Warn,
                    Trace::TweakRejected { code }
                );
            })?;
            self.apply_tweak(&tweak)?;
        }
        Ok(())
    }

    /// Applies one parsed command.  Nothing is changed on failure.
    pub fn apply(&self, cmd: &Command) -> Result<(), ResponseCode> {
        let verb = cmd.verb();

        let rval = cmd.validate().and_then(|()| match cmd {
            Command::Master {
                addr,
                id,
                bus_count,
            } => self.add_master(*addr, *id, *bus_count),
            _ => self.add_descriptor(cmd),
        });

        match rval {
            Ok(()) => ringbuf_entry!(
                self.trace,
                Level::Info,
                Trace::Applied {
                    verb,
                    addr: cmd.addr()
                }
            ),
            Err(code) => ringbuf_entry!(
                self.trace,
                Level::Warn,
                Trace::Rejected { verb, code }
            ),
        }

        rval
    }

    fn check_open(
        &self,
        reg: &Registry<R>,
        addr: u32,
    ) -> Result<(), ResponseCode> {
        if reg.initialized {
            return Err(ResponseCode::Busy);
        }

        if addr > self.opts.res_size {
            return Err(ResponseCode::AddressOutOfRange);
        }

        Ok(())
    }

    /// Every register a descriptor touches must be addressable, including
    /// those at a fixed offset above `addr`.
    fn check_window(addr: u32, span: u32) -> Result<(), ResponseCode> {
        addr.checked_add(span)
            .map(|_| ())
            .ok_or(ResponseCode::AddressOutOfRange)
    }

    fn add_master(
        &self,
        addr: u32,
        id: u32,
        bus_count: u8,
    ) -> Result<(), ResponseCode> {
        let master = {
            let mut reg = self.registry();
            self.check_open(&reg, addr)?;
            Self::check_window(addr, RESP_OFFSET)?;

            if reg.masters.contains_key(&id) {
                return Err(ResponseCode::AlreadyExists);
            }

            let master = Arc::new(SmbusMaster::new(
                self.regs.clone(),
                self.smbus_trace.clone(),
                id,
                addr,
                self.opts.max_retries,
            ));

            let end = reg
                .next_adapter
                .checked_add(u32::from(bus_count))
                .ok_or(ResponseCode::BadArg)?;

            let mut buses = Vec::new();
            buses
                .try_reserve_exact(usize::from(bus_count))
                .map_err(|_| ResponseCode::OutOfMemory)?;

            for bus in 0..bus_count {
                let adapter = reg.next_adapter + u32::from(bus);
                let name = format!(
                    "SCD {} SMBus master {id} bus {bus}",
                    self.opts.name
                );
                buses.push(Arc::new(SmbusBus::new(
                    master.clone(),
                    bus,
                    adapter,
                    name,
                )));
            }

            reg.next_adapter = end;
            reg.masters.insert(
                id,
                MasterEntry {
                    master: master.clone(),
                    buses,
                },
            );
            master
        };

        // Start from a clean FIFO.  The new master can't be in use yet, and
        // the context lock is not held across engine calls.
        master.reset();

        ringbuf_entry!(
            self.trace,
            Level::Info,
            Trace::MasterAdded {
                id,
                base: addr,
                buses: bus_count,
            }
        );
        Ok(())
    }

    fn add_descriptor(&self, cmd: &Command) -> Result<(), ResponseCode> {
        let mut reg = self.registry();
        self.check_open(&reg, cmd.addr())?;

        match cmd {
            Command::Master { .. } => return Err(ResponseCode::BadArg),
            Command::Led { addr, name } => {
                if reg.leds.contains_key(addr) {
                    return Err(ResponseCode::AlreadyExists);
                }
                let led = Led::new(*addr, name.clone());
                reg.leds.insert(*addr, Arc::new(led));
            }
            Command::Reset { addr, name, bit } => {
                Self::check_window(*addr, RESET_CLEAR_OFFSET)?;
                if reg.name_taken(name) {
                    return Err(ResponseCode::AlreadyExists);
                }
                reg.resets.insert(
                    name.clone(),
                    Reset {
                        addr: *addr,
                        bit: *bit,
                        name: name.clone(),
                    },
                );
            }
            Command::Gpio {
                addr,
                name,
                bit,
                read_only,
                active_low,
            } => {
                if reg.name_taken(name) {
                    return Err(ResponseCode::AlreadyExists);
                }
                reg.gpios.insert(
                    name.clone(),
                    Gpio {
                        addr: *addr,
                        bit: *bit,
                        read_only: *read_only,
                        active_low: *active_low,
                        name: name.clone(),
                    },
                );
            }
            Command::Sfp { addr, id } | Command::Qsfp { addr, id } => {
                let (prefix, table) = match cmd {
                    Command::Sfp { .. } => ("sfp", &SFP_BITS[..]),
                    _ => ("qsfp", &QSFP_BITS[..]),
                };
                let gpios = attr::xcvr_gpios(prefix, table, *addr, *id);

                // All or nothing.
                if gpios.iter().any(|g| reg.name_taken(&g.name)) {
                    return Err(ResponseCode::AlreadyExists);
                }
                for gpio in gpios {
                    reg.gpios.insert(gpio.name.clone(), gpio);
                }
            }
        }

        Ok(())
    }

    /// Applies one parsed tweak.
    pub fn apply_tweak(&self, tweak: &Tweak) -> Result<(), ResponseCode> {
        let rval = {
            let reg = self.registry();

            if reg.initialized {
                Err(ResponseCode::Busy)
            } else {
                match reg.bus(tweak.adapter) {
                    Some(bus) => bus.tweak(tweak.addr, tweak.params),
                    None => Err(ResponseCode::NoBus),
                }
            }
        };

        match rval {
            Ok(()) => ringbuf_entry!(
                self.trace,
                Level::Info,
                Trace::Tweaked {
                    adapter: tweak.adapter,
                    addr: tweak.addr,
                }
            ),
            Err(code) => ringbuf_entry!(
                self.trace,
                Level::Warn,
                Trace::TweakRejected { code }
            ),
        }

        rval
    }

    ///
    /// Locks the topology and publishes every bus as an adapter.  Calling it
    /// again once locked does nothing.  The outcome is kept for
    /// [`Context::init_error`].
    ///
    pub fn finish_init(&self) -> Result<(), ResponseCode> {
        let mut reg = self.registry();

        if reg.initialized {
            return Ok(());
        }

        let rval = Self::publish(&mut reg);
        reg.init_error = rval.map_or_else(|code| code.errno(), |()| 0);

        match rval {
            Ok(()) => {
                reg.initialized = true;
                ringbuf_entry!(
                    self.trace,
                    Level::Info,
                    Trace::Locked {
                        adapters: reg.adapters.len() as u32,
                    }
                );
            }
            Err(code) => ringbuf_entry!(
                self.trace,
                Level::Error,
                Trace::LockFailed { code }
            ),
        }

        rval
    }

    fn publish(reg: &mut Registry<R>) -> Result<(), ResponseCode> {
        let buses: Vec<Arc<SmbusBus<R>>> = reg
            .masters
            .values()
            .flat_map(|m| m.buses.iter().cloned())
            .collect();

        let mut adapters = IndexMap::with_capacity(buses.len());
        for bus in buses {
            if adapters.insert(bus.adapter_nr(), bus).is_some() {
                return Err(ResponseCode::AlreadyExists);
            }
        }

        reg.adapters = adapters;
        Ok(())
    }

    /// 0 after a successful lock (or before any attempt); otherwise the
    /// errno of the last failed attempt.
    pub fn init_error(&self) -> u32 {
        self.registry().init_error
    }

    pub fn is_initialized(&self) -> bool {
        self.registry().initialized
    }

    /// A published adapter.  Nothing is published before the lock.
    pub fn adapter(&self, nr: u32) -> Option<Arc<SmbusBus<R>>> {
        self.registry().adapters.get(&nr).cloned()
    }

    pub fn adapters(&self) -> Vec<Arc<SmbusBus<R>>> {
        self.registry().adapters.values().cloned().collect()
    }

    /// Looks a bus up by adapter number whether or not it is published.
    pub fn find_bus(&self, nr: u32) -> Option<Arc<SmbusBus<R>>> {
        self.registry().bus(nr).cloned()
    }

    pub fn master(&self, id: u32) -> Option<Arc<SmbusMaster<R>>> {
        self.registry().masters.get(&id).map(|m| m.master.clone())
    }

    pub fn topology(&self) -> Topology {
        let reg = self.registry();

        Topology {
            initialized: reg.initialized,
            masters: reg
                .masters
                .iter()
                .map(|(id, m)| MasterInfo {
                    id: *id,
                    base: m.master.base(),
                    buses: m
                        .buses
                        .iter()
                        .map(|b| BusInfo {
                            id: b.id(),
                            adapter: b.adapter_nr(),
                            name: b.name().to_string(),
                            tweaks: b.tweaks(),
                        })
                        .collect(),
                })
                .collect(),
            leds: reg
                .leds
                .values()
                .map(|l| LedInfo {
                    addr: l.addr,
                    name: l.name.clone(),
                    brightness: l.brightness(),
                })
                .collect(),
            gpios: reg.gpios.values().cloned().collect(),
            resets: reg.resets.values().cloned().collect(),
        }
    }

    fn gpio_desc(&self, name: &str) -> Result<Gpio, ResponseCode> {
        self.registry()
            .gpios
            .get(name)
            .cloned()
            .ok_or(ResponseCode::NoAttribute)
    }

    fn reset_desc(&self, name: &str) -> Result<Reset, ResponseCode> {
        self.registry()
            .resets
            .get(name)
            .cloned()
            .ok_or(ResponseCode::NoAttribute)
    }

    fn led_desc(&self, name: &str) -> Result<Arc<Led>, ResponseCode> {
        self.registry()
            .leds
            .values()
            .find(|l| l.name == name)
            .cloned()
            .ok_or(ResponseCode::NoAttribute)
    }

    pub fn gpio(&self, name: &str) -> Result<bool, ResponseCode> {
        Ok(self.gpio_desc(name)?.get(&self.regs))
    }

    pub fn set_gpio(
        &self,
        name: &str,
        value: bool,
    ) -> Result<(), ResponseCode> {
        self.gpio_desc(name)?.set(&self.regs, value)
    }

    pub fn reset(&self, name: &str) -> Result<bool, ResponseCode> {
        Ok(self.reset_desc(name)?.get(&self.regs))
    }

    pub fn set_reset(
        &self,
        name: &str,
        value: bool,
    ) -> Result<(), ResponseCode> {
        self.reset_desc(name)?.set(&self.regs, value);
        Ok(())
    }

    pub fn brightness(&self, name: &str) -> Result<u32, ResponseCode> {
        Ok(self.led_desc(name)?.brightness())
    }

    pub fn set_brightness(
        &self,
        name: &str,
        brightness: u32,
    ) -> Result<(), ResponseCode> {
        self.led_desc(name)?.set_brightness(&self.regs, brightness);
        Ok(())
    }

    /// Text value of a GPIO or reset attribute.
    pub fn show_attr(&self, name: &str) -> Result<String, ResponseCode> {
        let value = match self.gpio(name) {
            Err(ResponseCode::NoAttribute) => self.reset(name)?,
            rval => rval?,
        };
        Ok(attr::show(value.into()))
    }

    /// Writes a GPIO or reset attribute from text.  Resets take only 0 or
    /// 1; GPIOs treat any non-zero value as 1.
    pub fn store_attr(
        &self,
        name: &str,
        buf: &str,
    ) -> Result<(), ResponseCode> {
        let value = attr::parse_store(buf)?;

        if let Ok(gpio) = self.gpio_desc(name) {
            return gpio.set(&self.regs, value != 0);
        }

        let reset = self.reset_desc(name)?;
        match value {
            0 | 1 => {
                reset.set(&self.regs, value == 1);
                Ok(())
            }
            _ => Err(ResponseCode::BadArg),
        }
    }

    pub fn show_brightness(&self, name: &str) -> Result<String, ResponseCode> {
        Ok(attr::show(self.brightness(name)?))
    }

    pub fn store_brightness(
        &self,
        name: &str,
        buf: &str,
    ) -> Result<(), ResponseCode> {
        self.set_brightness(name, attr::parse_store(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_scd_smbus::sim::SimRegisters;

    fn context(res_size: u32) -> Context<SimRegisters> {
        let mut opts = ContextOptions::new("test", res_size);
        opts.log_level = Level::Debug;
        Context::new(Arc::new(SimRegisters::new()), opts)
    }

    #[test]
    fn adapters_number_from_base() {
        let mut opts = ContextOptions::new("sw", 0x10000);
        opts.adapter_base = 10;
        let ctx = Context::new(Arc::new(SimRegisters::new()), opts);

        ctx.new_object("master 0x8000 0 2\nmaster 0x8100 1 3").unwrap();

        let topo = ctx.topology();
        let adapters: Vec<u32> = topo
            .masters
            .iter()
            .flat_map(|m| m.buses.iter().map(|b| b.adapter))
            .collect();
        assert_eq!(adapters, [10, 11, 12, 13, 14]);
        assert_eq!(
            topo.masters[1].buses[2].name,
            "SCD sw SMBus master 1 bus 2"
        );
    }

    #[test]
    fn master_creation_resets() {
        let ctx = context(0x10000);
        ctx.regs().add_master(0x8000);
        ctx.new_master("0x8000 0 1").unwrap();
        assert_eq!(ctx.regs().resets(0x8000), 1);
    }

    #[test]
    fn names_are_shared_by_gpios_and_resets() {
        let ctx = context(0x10000);
        ctx.new_gpio("0x200 x 0 0 0").unwrap();
        assert_eq!(
            ctx.new_reset("0x300 x 1"),
            Err(ResponseCode::AlreadyExists)
        );
    }

    #[test]
    fn xcvr_collision_inserts_nothing() {
        let ctx = context(0x10000);
        ctx.new_gpio("0x200 sfp3_txdisable 0 0 0").unwrap();
        assert_eq!(ctx.new_sfp("0xa000 3"), Err(ResponseCode::AlreadyExists));
        assert_eq!(ctx.topology().gpios.len(), 1);

        ctx.new_sfp("0xa000 4").unwrap();
        assert_eq!(ctx.topology().gpios.len(), 1 + SFP_BITS.len());
    }

    #[test]
    fn failures_are_traced() {
        let ctx = context(0x100);
        let _ = ctx.new_object("led 0x200 x");

        let rejected = ctx.trace().snapshot().iter().any(|e| {
            e.payload
                == Trace::Rejected {
                    verb: Verb::Led,
                    code: ResponseCode::AddressOutOfRange,
                }
        });
        assert!(rejected);
    }
}
