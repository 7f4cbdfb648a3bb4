// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The topology command language.
//!
//! A write to a control surface is a buffer of lines separated by `\n` or
//! `\0`.  Each line is a verb followed by space-separated arguments:
//!
//! ```text
//! master <addr> <id> [<bus_count>]
//! led <addr> <name>
//! sfp <addr> <id>
//! qsfp <addr> <id>
//! reset <addr> <name> <bit>
//! gpio <addr> <name> <bit> <readonly> <activelow>
//! ```
//!
//! Tweak lines have no verb: `<adapter> <addr> <t> <datr> <datw>`.
//!
//! Integers are decimal or `0x`-prefixed hex.  Parsing never touches the
//! registry; it only produces [`Command`] and [`Tweak`] values, which the
//! context then applies.

use core::str::FromStr;

use drv_scd_smbus::BusParams;
use drv_scd_types::ResponseCode;
use num_traits::Num;

/// Buses created by a `master` line that doesn't say.
pub const DEFAULT_BUS_COUNT: u8 = 8;

/// Most buses one master can address; `bs` is four bits.
pub const MAX_BUS_COUNT: u8 = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verb {
    Master,
    Led,
    Sfp,
    Qsfp,
    Reset,
    Gpio,
}

impl Verb {
    pub fn name(self) -> &'static str {
        match self {
            Verb::Master => "master",
            Verb::Led => "led",
            Verb::Sfp => "sfp",
            Verb::Qsfp => "qsfp",
            Verb::Reset => "reset",
            Verb::Gpio => "gpio",
        }
    }
}

impl FromStr for Verb {
    type Err = ResponseCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "master" => Verb::Master,
            "led" => Verb::Led,
            "sfp" => Verb::Sfp,
            "qsfp" => Verb::Qsfp,
            "reset" => Verb::Reset,
            "gpio" => Verb::Gpio,
            _ => return Err(ResponseCode::BadArg),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Master {
        addr: u32,
        id: u32,
        bus_count: u8,
    },
    Led {
        addr: u32,
        name: String,
    },
    Sfp {
        addr: u32,
        id: u32,
    },
    Qsfp {
        addr: u32,
        id: u32,
    },
    Reset {
        addr: u32,
        name: String,
        bit: u8,
    },
    Gpio {
        addr: u32,
        name: String,
        bit: u8,
        read_only: bool,
        active_low: bool,
    },
}

/// A per-target parameter override for one adapter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tweak {
    pub adapter: u32,
    pub addr: u8,
    pub params: BusParams,
}

/// The non-empty lines of a control surface write.
pub fn lines(buf: &str) -> impl Iterator<Item = &str> {
    buf.split(['\n', '\0']).filter(|l| !l.trim().is_empty())
}

/// Parses a decimal or `0x`-prefixed integer.
pub fn parse_number<T>(token: &str) -> Result<T, ResponseCode>
where
    T: Num,
{
    parse_int::parse::<T>(token).map_err(|_| ResponseCode::BadArg)
}

struct Args<'a> {
    tokens: core::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            tokens: line.split_whitespace(),
        }
    }

    fn token(&mut self) -> Result<&'a str, ResponseCode> {
        self.tokens.next().ok_or(ResponseCode::BadArg)
    }

    fn int<T: Num>(&mut self) -> Result<T, ResponseCode> {
        parse_number(self.token()?)
    }

    fn opt_int<T: Num>(&mut self) -> Result<Option<T>, ResponseCode> {
        self.tokens.next().map(parse_number).transpose()
    }

    fn flag(&mut self) -> Result<bool, ResponseCode> {
        match self.int::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ResponseCode::BadArg),
        }
    }

    fn name(&mut self) -> Result<String, ResponseCode> {
        Ok(self.token()?.to_string())
    }

    fn finish(mut self) -> Result<(), ResponseCode> {
        match self.tokens.next() {
            Some(_) => Err(ResponseCode::BadArg),
            None => Ok(()),
        }
    }
}

impl Command {
    /// Parses a full line, verb first.
    pub fn parse(line: &str) -> Result<Self, ResponseCode> {
        let line = line.trim_start();
        let (verb, rest) =
            line.split_once(char::is_whitespace).unwrap_or((line, ""));

        Self::parse_args(verb.parse()?, rest)
    }

    /// Parses the arguments of a line whose verb is already known.
    pub fn parse_args(verb: Verb, line: &str) -> Result<Self, ResponseCode> {
        let mut args = Args::new(line);

        let cmd = match verb {
            Verb::Master => Command::Master {
                addr: args.int()?,
                id: args.int()?,
                bus_count: args.opt_int()?.unwrap_or(DEFAULT_BUS_COUNT),
            },
            Verb::Led => Command::Led {
                addr: args.int()?,
                name: args.name()?,
            },
            Verb::Sfp => Command::Sfp {
                addr: args.int()?,
                id: args.int()?,
            },
            Verb::Qsfp => Command::Qsfp {
                addr: args.int()?,
                id: args.int()?,
            },
            Verb::Reset => Command::Reset {
                addr: args.int()?,
                name: args.name()?,
                bit: args.int()?,
            },
            Verb::Gpio => Command::Gpio {
                addr: args.int()?,
                name: args.name()?,
                bit: args.int()?,
                read_only: args.flag()?,
                active_low: args.flag()?,
            },
        };

        args.finish()?;
        cmd.validate()?;
        Ok(cmd)
    }

    /// Checks the values a line can't express wrongly by grammar alone.
    /// Address bounds depend on the device and are checked when applied.
    pub fn validate(&self) -> Result<(), ResponseCode> {
        match self {
            Command::Master { bus_count, .. }
                if *bus_count == 0 || *bus_count > MAX_BUS_COUNT =>
            {
                Err(ResponseCode::BadArg)
            }
            Command::Reset { bit, .. } | Command::Gpio { bit, .. }
                if *bit >= 32 =>
            {
                Err(ResponseCode::BadArg)
            }
            _ => Ok(()),
        }
    }

    pub fn verb(&self) -> Verb {
        match self {
            Command::Master { .. } => Verb::Master,
            Command::Led { .. } => Verb::Led,
            Command::Sfp { .. } => Verb::Sfp,
            Command::Qsfp { .. } => Verb::Qsfp,
            Command::Reset { .. } => Verb::Reset,
            Command::Gpio { .. } => Verb::Gpio,
        }
    }

    /// The register address the command refers to.
    pub fn addr(&self) -> u32 {
        match self {
            Command::Master { addr, .. }
            | Command::Led { addr, .. }
            | Command::Sfp { addr, .. }
            | Command::Qsfp { addr, .. }
            | Command::Reset { addr, .. }
            | Command::Gpio { addr, .. } => *addr,
        }
    }
}

impl Tweak {
    pub fn new(
        adapter: u32,
        addr: u8,
        t: u8,
        datr: u8,
        datw: u8,
    ) -> Result<Self, ResponseCode> {
        if addr > 0x7f {
            return Err(ResponseCode::BadArg);
        }

        Ok(Self {
            adapter,
            addr,
            params: BusParams::new(t, datr, datw)?,
        })
    }

    pub fn parse(line: &str) -> Result<Self, ResponseCode> {
        let mut args = Args::new(line);

        let tweak = Self::new(
            args.int()?,
            args.int()?,
            args.int()?,
            args.int()?,
            args.int()?,
        )?;

        args.finish()?;
        Ok(tweak)
    }
}
