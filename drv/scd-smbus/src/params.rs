// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-target transaction shape overrides.
//!
//! Some targets need a slower clock or a longer FIFO drain than the master's
//! defaults.  Each bus keeps a short list of overrides keyed by target
//! address; targets without one get [`BusParams::DEFAULT`].

use drv_scd_types::ResponseCode;

/// Shape parameters for transactions to one target.  All three fields are
/// 2-bit selectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusParams {
    /// Clock rate selector
    pub t: u8,
    /// FIFO drain selector for the final slot of a write
    pub datw: u8,
    /// FIFO drain selector for the final slot of a read
    pub datr: u8,
}

impl BusParams {
    pub const DEFAULT: BusParams = BusParams {
        t: 1,
        datw: 3,
        datr: 3,
    };

    /// Builds a parameter record, rejecting selectors wider than their field.
    pub fn new(t: u8, datr: u8, datw: u8) -> Result<Self, ResponseCode> {
        if t > 3 || datr > 3 || datw > 3 {
            return Err(ResponseCode::BadArg);
        }

        Ok(Self { t, datw, datr })
    }
}

impl Default for BusParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

///
/// The override list of one bus.  Lists are short (a handful of odd targets
/// at most), so lookup and upsert are linear scans in insertion order.
///
#[derive(Clone, Debug, Default)]
pub struct BusParamTable {
    entries: Vec<(u8, BusParams)>,
}

impl BusParamTable {
    pub fn get(&self, addr: u8) -> BusParams {
        self.entries
            .iter()
            .find(|(a, _)| *a == addr)
            .map_or(BusParams::DEFAULT, |(_, params)| *params)
    }

    /// Replaces the override for `addr`, or appends one.
    pub fn upsert(
        &mut self,
        addr: u8,
        params: BusParams,
    ) -> Result<(), ResponseCode> {
        if let Some((_, p)) = self.entries.iter_mut().find(|(a, _)| *a == addr)
        {
            *p = params;
            return Ok(());
        }

        self.entries
            .try_reserve(1)
            .map_err(|_| ResponseCode::OutOfMemory)?;
        self.entries.push((addr, params));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, BusParams)> + '_ {
        self.entries.iter().copied()
    }
}
