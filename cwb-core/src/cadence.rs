//! Processing cadences, imagery dates and tile-grid generations.

use crate::error::{CwbError, Result};
use cwb_utils::dates;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Daily or weekly processing track.
///
/// The two tracks read different imagery, write different result tables
/// and keep independent retry ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    pub const ALL: [Cadence; 2] = [Cadence::Daily, Cadence::Weekly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
        }
    }

    pub fn from_daily_flag(daily: bool) -> Self {
        if daily {
            Cadence::Daily
        } else {
            Cadence::Weekly
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image date on one cadence track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageDate {
    pub year: i32,
    pub day: u32,
    pub cadence: Cadence,
}

impl ImageDate {
    /// Build a validated image date; `day` must exist in `year`.
    pub fn new(year: i32, day: u32, cadence: Cadence) -> Result<Self> {
        if !dates::is_valid_day(year, day) {
            return Err(CwbError::MalformedInput(format!(
                "day {} is not a valid day of year {}",
                day, year
            )));
        }
        Ok(Self { year, day, cadence })
    }

    /// Sortable `(year, day)` key, see [`dates::ordinal_key`].
    pub fn ordinal(&self) -> i64 {
        dates::ordinal_key(self.year, self.day)
    }
}

impl fmt::Display for ImageDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", dates::format_year_day(self.year, self.day), self.cadence)
    }
}

/// Identifies one configuration of tile bounds: the `(year, day)` of the
/// reference raster the bounds were read from.
///
/// Generations order chronologically, and the generation applying to an
/// image date is the latest one on or before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationKey {
    pub year: i32,
    pub day: u32,
}

impl GenerationKey {
    pub fn new(year: i32, day: u32) -> Result<Self> {
        if !dates::is_valid_day(year, day) {
            return Err(CwbError::MalformedInput(format!(
                "day {} is not a valid day of year {}",
                day, year
            )));
        }
        Ok(Self { year, day })
    }

    /// The daily image date whose tiles serve as the reference raster.
    pub fn reference_date(&self) -> ImageDate {
        ImageDate {
            year: self.year,
            day: self.day,
            cadence: Cadence::Daily,
        }
    }

    /// True when this generation was in effect on `date`.
    pub fn covers(&self, date: &ImageDate) -> bool {
        dates::ordinal_key(self.year, self.day) <= date.ordinal()
    }
}

impl fmt::Display for GenerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&dates::format_year_day(self.year, self.day))
    }
}

/// Pick the generation applying to `date` out of `generations`.
pub fn generation_for<'a, I>(generations: I, date: &ImageDate) -> Option<GenerationKey>
where
    I: IntoIterator<Item = &'a GenerationKey>,
{
    generations
        .into_iter()
        .filter(|g| g.covers(date))
        .max()
        .copied()
}
