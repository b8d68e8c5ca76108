//! Packed issue and expiry dates
//!
//! Three bytes, big endian:
//!
//! | bits  | field                      |
//! |-------|----------------------------|
//! | 23-19 | year since 2000            |
//! | 18-15 | month                      |
//! | 14-10 | day                        |
//! | 9-5   | hour                       |
//! | 4-0   | validity in years          |
//!
//! Minutes and seconds are always zero.

use crate::error::{Error, Result};

/// Length of a UTCTime value, `YYMMDDHHMMSSZ`
pub const UTC_TIME_LEN: usize = 13;

/// Packed certificate dates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressedDate(u32);

impl CompressedDate {
    const YEAR_MASK: u32 = 0x1F;
    const YEAR_OFFSET: u32 = 19;
    const MONTH_MASK: u32 = 0x0F;
    const MONTH_OFFSET: u32 = 15;
    const DAY_MASK: u32 = 0x1F;
    const DAY_OFFSET: u32 = 10;
    const HOUR_MASK: u32 = 0x1F;
    const HOUR_OFFSET: u32 = 5;
    const EXPIRE_MASK: u32 = 0x1F;
    const EXPIRE_OFFSET: u32 = 0;

    /// Base year of the year field
    pub const BASE_YEAR: u16 = 2000;

    /// All fields zero
    pub const fn new() -> Self {
        Self(0)
    }

    /// Unpack from the three stored bytes
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    /// The three stored bytes
    pub const fn to_bytes(self) -> [u8; 3] {
        let raw = self.0.to_be_bytes();
        [raw[1], raw[2], raw[3]]
    }

    const fn field(self, offset: u32, mask: u32) -> u8 {
        ((self.0 >> offset) & mask) as u8
    }

    const fn with_field(self, offset: u32, mask: u32, value: u8) -> Self {
        let cleared = self.0 & !(mask << offset);
        Self(cleared | (((value as u32) & mask) << offset))
    }

    /// Years since 2000
    pub const fn year(self) -> u8 {
        self.field(Self::YEAR_OFFSET, Self::YEAR_MASK)
    }

    /// Set the years since 2000
    pub const fn with_year(self, year: u8) -> Self {
        self.with_field(Self::YEAR_OFFSET, Self::YEAR_MASK, year)
    }

    /// Month, 1-12
    pub const fn month(self) -> u8 {
        self.field(Self::MONTH_OFFSET, Self::MONTH_MASK)
    }

    /// Set the month
    pub const fn with_month(self, month: u8) -> Self {
        self.with_field(Self::MONTH_OFFSET, Self::MONTH_MASK, month)
    }

    /// Day of month, 1-31
    pub const fn day(self) -> u8 {
        self.field(Self::DAY_OFFSET, Self::DAY_MASK)
    }

    /// Set the day of month
    pub const fn with_day(self, day: u8) -> Self {
        self.with_field(Self::DAY_OFFSET, Self::DAY_MASK, day)
    }

    /// Hour, 0-23
    pub const fn hour(self) -> u8 {
        self.field(Self::HOUR_OFFSET, Self::HOUR_MASK)
    }

    /// Set the hour
    pub const fn with_hour(self, hour: u8) -> Self {
        self.with_field(Self::HOUR_OFFSET, Self::HOUR_MASK, hour)
    }

    /// Validity in years
    pub const fn expire_years(self) -> u8 {
        self.field(Self::EXPIRE_OFFSET, Self::EXPIRE_MASK)
    }

    /// Set the validity in years
    pub const fn with_expire_years(self, years: u8) -> Self {
        self.with_field(Self::EXPIRE_OFFSET, Self::EXPIRE_MASK, years)
    }

    /// Issue date as UTCTime
    pub fn issue_time(self) -> Result<[u8; UTC_TIME_LEN]> {
        utc_time(
            Self::BASE_YEAR + self.year() as u16,
            self.month(),
            self.day(),
            self.hour(),
        )
    }

    /// Expiry date as UTCTime: the issue date moved by the validity in years
    pub fn expire_time(self) -> Result<[u8; UTC_TIME_LEN]> {
        utc_time(
            Self::BASE_YEAR + self.year() as u16 + self.expire_years() as u16,
            self.month(),
            self.day(),
            self.hour(),
        )
    }
}

/// Format `YYMMDDHH0000Z`.
///
/// UTCTime only covers 1950 to 2049; later years are out of range.
pub fn utc_time(year: u16, month: u8, day: u8, hour: u8) -> Result<[u8; UTC_TIME_LEN]> {
    if !(2000..2050).contains(&year) {
        return Err(Error::DateOutOfRange("year not expressible as UTCTime"));
    }
    if !(1..=12).contains(&month) {
        return Err(Error::DateOutOfRange("month"));
    }
    if !(1..=31).contains(&day) {
        return Err(Error::DateOutOfRange("day"));
    }
    if hour > 23 {
        return Err(Error::DateOutOfRange("hour"));
    }

    let mut out = *b"000000000000Z";
    for (i, value) in [(year % 100) as u8, month, day, hour].into_iter().enumerate() {
        out[2 * i] = b'0' + value / 10;
        out[2 * i + 1] = b'0' + value % 10;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_unpack_fields() {
        let date = CompressedDate::from_bytes(hex!("8a3154"));
        assert_eq!(date.year(), 17);
        assert_eq!(date.month(), 4);
        assert_eq!(date.day(), 12);
        assert_eq!(date.hour(), 10);
        assert_eq!(date.expire_years(), 20);
    }

    #[test]
    fn test_builder_packs_big_endian() {
        let date = CompressedDate::new()
            .with_year(17)
            .with_month(4)
            .with_day(12)
            .with_hour(10)
            .with_expire_years(20);
        assert_eq!(date.to_bytes(), hex!("8a3154"));
    }

    #[test]
    fn test_utc_strings() {
        let date = CompressedDate::from_bytes(hex!("8a3154"));
        assert_eq!(&date.issue_time().unwrap(), b"170412100000Z");
        assert_eq!(&date.expire_time().unwrap(), b"370412100000Z");
    }

    #[test]
    fn test_expiry_beyond_utc_time_is_rejected() {
        let date = CompressedDate::new()
            .with_year(30)
            .with_month(1)
            .with_day(1)
            .with_expire_years(25);
        assert!(date.issue_time().is_ok());
        assert_eq!(
            date.expire_time(),
            Err(Error::DateOutOfRange("year not expressible as UTCTime"))
        );
    }

    #[test]
    fn test_invalid_fields() {
        assert_eq!(utc_time(2020, 0, 1, 0), Err(Error::DateOutOfRange("month")));
        assert_eq!(utc_time(2020, 13, 1, 0), Err(Error::DateOutOfRange("month")));
        assert_eq!(utc_time(2020, 1, 0, 0), Err(Error::DateOutOfRange("day")));
        assert_eq!(utc_time(2020, 1, 1, 24), Err(Error::DateOutOfRange("hour")));
    }
}
