//! MSF (minutes/seconds/frames) addressing and BCD helpers

use crate::MSF_OFFSET;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CdTime {
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl CdTime {
    pub const ZERO: Self = Self { minutes: 0, seconds: 0, frames: 0 };

    pub const MAX_MINUTES: u8 = 100;
    pub const SECONDS_PER_MINUTE: u8 = 60;
    pub const FRAMES_PER_SECOND: u8 = 75;

    pub const MAX_SECTORS: u32 = 450000;

    /// Create a new `CdTime`.
    ///
    /// # Panics
    ///
    /// Panics if any component is out of range.
    #[must_use]
    pub fn new(minutes: u8, seconds: u8, frames: u8) -> Self {
        assert!(minutes < Self::MAX_MINUTES, "Minutes must be less than {}", Self::MAX_MINUTES);
        assert!(
            seconds < Self::SECONDS_PER_MINUTE,
            "Seconds must be less than {}",
            Self::SECONDS_PER_MINUTE
        );
        assert!(
            frames < Self::FRAMES_PER_SECOND,
            "Frames must be less than {}",
            Self::FRAMES_PER_SECOND
        );

        Self { minutes, seconds, frames }
    }

    #[must_use]
    pub fn new_checked(minutes: u8, seconds: u8, frames: u8) -> Option<Self> {
        (minutes < Self::MAX_MINUTES
            && seconds < Self::SECONDS_PER_MINUTE
            && frames < Self::FRAMES_PER_SECOND)
            .then_some(Self { minutes, seconds, frames })
    }

    #[must_use]
    pub fn to_sector_number(self) -> u32 {
        (u32::from(Self::SECONDS_PER_MINUTE) * u32::from(self.minutes) + u32::from(self.seconds))
            * u32::from(Self::FRAMES_PER_SECOND)
            + u32::from(self.frames)
    }

    /// # Panics
    ///
    /// Panics if `sector_number` is not less than [`Self::MAX_SECTORS`].
    #[must_use]
    pub fn from_sector_number(sector_number: u32) -> Self {
        assert!(sector_number < Self::MAX_SECTORS, "Invalid sector number: {sector_number}");

        let frames = sector_number % u32::from(Self::FRAMES_PER_SECOND);
        let seconds = (sector_number / u32::from(Self::FRAMES_PER_SECOND))
            % u32::from(Self::SECONDS_PER_MINUTE);
        let minutes = sector_number
            / (u32::from(Self::FRAMES_PER_SECOND) * u32::from(Self::SECONDS_PER_MINUTE));

        Self::new(minutes as u8, seconds as u8, frames as u8)
    }

    /// Convert an LBA to its absolute MSF address. LBA 0 is 00:02:00; negative LBAs down to -150
    /// map into the first two seconds and anything below wraps around to the 90-99 minute range.
    #[must_use]
    pub fn from_lba(lba: i32) -> Self {
        let sector_number = (i64::from(lba) + i64::from(MSF_OFFSET))
            .rem_euclid(i64::from(Self::MAX_SECTORS));
        Self::from_sector_number(sector_number as u32)
    }

    /// Inverse of [`Self::from_lba`]. Minutes 90-99 are treated as negative LBAs.
    #[must_use]
    pub fn to_lba(self) -> i32 {
        let sector_number = self.to_sector_number() as i32;
        if self.minutes >= 90 {
            sector_number - Self::MAX_SECTORS as i32 - MSF_OFFSET
        } else {
            sector_number - MSF_OFFSET
        }
    }

    #[must_use]
    pub fn to_bcd(self) -> [u8; 3] {
        [to_bcd(self.minutes), to_bcd(self.seconds), to_bcd(self.frames)]
    }

    #[must_use]
    pub fn from_bcd(bytes: [u8; 3]) -> Option<Self> {
        let [minutes, seconds, frames] = bytes;
        Self::new_checked(from_bcd(minutes)?, from_bcd(seconds)?, from_bcd(frames)?)
    }
}

impl FromStr for CdTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 8 {
            return Err(format!("Invalid time length: {}", bytes.len()));
        }

        if bytes[2] != b':' || bytes[5] != b':' {
            return Err(format!("Unexpected time format: {s}"));
        }

        let err_fn = |_err| format!("Invalid time string: {s}");
        let minutes: u8 = s[0..2].parse().map_err(err_fn)?;
        let seconds: u8 = s[3..5].parse().map_err(err_fn)?;
        let frames: u8 = s[6..8].parse().map_err(err_fn)?;

        CdTime::new_checked(minutes, seconds, frames)
            .ok_or_else(|| format!("Time component out of range: {s}"))
    }
}

impl Display for CdTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.minutes, self.seconds, self.frames)
    }
}

/// Encode a value in 0..100 as packed BCD.
#[must_use]
pub fn to_bcd(value: u8) -> u8 {
    let msb = value / 10;
    let lsb = value % 10;
    (msb << 4) | lsb
}

/// Decode a packed BCD byte. Returns `None` if either nibble is not a decimal digit.
#[must_use]
pub fn from_bcd(bcd: u8) -> Option<u8> {
    let msb = bcd >> 4;
    let lsb = bcd & 0x0F;
    (msb < 10 && lsb < 10).then_some(10 * msb + lsb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_number_limits() {
        assert_eq!(CdTime::new(99, 59, 74).to_sector_number(), CdTime::MAX_SECTORS - 1);
        assert_eq!(CdTime::from_sector_number(CdTime::MAX_SECTORS - 1), CdTime::new(99, 59, 74));
        assert_eq!(CdTime::from_sector_number(0), CdTime::ZERO);

        assert_eq!(CdTime::new_checked(100, 0, 0), None);
        assert!("99:59:74".parse::<CdTime>().is_ok());
        assert!("100:00:00".parse::<CdTime>().is_err());

        // Anything past 100 minutes wraps back to the start of the address space
        assert_eq!(CdTime::from_lba(CdTime::MAX_SECTORS as i32 - 150), CdTime::ZERO);
        assert_eq!(CdTime::from_lba(-150 - CdTime::MAX_SECTORS as i32), CdTime::ZERO);
    }

    #[test]
    #[should_panic(expected = "Invalid sector number")]
    fn sector_number_out_of_range() {
        let _ = CdTime::from_sector_number(CdTime::MAX_SECTORS);
    }

    #[test]
    fn lba_conversion() {
        assert_eq!(CdTime::from_lba(0), CdTime::new(0, 2, 0));
        assert_eq!(CdTime::from_lba(-150), CdTime::ZERO);
        assert_eq!(CdTime::from_lba(50), CdTime::new(0, 2, 50));
        assert_eq!(CdTime::from_lba(16), CdTime::new(0, 2, 16));
        assert_eq!(CdTime::from_lba(-151), CdTime::new(99, 59, 74));

        for lba in [-151, -150, -1, 0, 1, 4500, 333_000, 404_849] {
            assert_eq!(CdTime::from_lba(lba).to_lba(), lba, "LBA {lba}");
        }
    }

    #[test]
    fn bcd() {
        assert_eq!(to_bcd(0), 0x00);
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x74), Some(74));
        assert_eq!(from_bcd(0x1A), None);

        assert_eq!(CdTime::new(12, 34, 56).to_bcd(), [0x12, 0x34, 0x56]);
        assert_eq!(CdTime::from_bcd([0x00, 0x02, 0x25]), Some(CdTime::new(0, 2, 25)));
        assert_eq!(CdTime::from_bcd([0x00, 0x60, 0x00]), None);
    }

    #[test]
    fn parse_and_display() {
        let time: CdTime = "13:10:11".parse().unwrap();
        assert_eq!(time, CdTime::new(13, 10, 11));
        assert_eq!(time.to_string(), "13:10:11");

        assert!("13:10".parse::<CdTime>().is_err());
        assert!("13-10-11".parse::<CdTime>().is_err());
        assert!("00:00:75".parse::<CdTime>().is_err());
    }
}
