// DOS date/time packing for directory entries.
//
// Date word: bits 0-4 day, 5-8 month, 9-15 year since 1980.
// Time word: bits 0-4 seconds/2, 5-10 minute, 11-15 hour.
// The tenths byte adds 0..199 units of 10ms on top of the 2-second
// granularity. All values are in the local time zone.

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};

/// Pack a timestamp into (date, time, tenths) words. Years outside the
/// representable 1980..=2107 range are clamped.
pub fn encode_dos_datetime(t: DateTime<Local>) -> (u16, u16, u8) {
    let year = t.year().clamp(1980, 2107);

    let date = (((year - 1980) as u16) << 9) | ((t.month() as u16) << 5) | t.day() as u16;
    let time =
        ((t.hour() as u16) << 11) | ((t.minute() as u16) << 5) | (t.second() as u16 / 2);
    let tenths = ((t.second() % 2) * 100 + t.timestamp_subsec_millis() / 10) as u8;

    (date, time, tenths)
}

/// Unpack (date, time, tenths) words into a local timestamp. Field
/// combinations that name no real calendar moment decode to the epoch.
pub fn decode_dos_datetime(date: u16, time: u16, tenths: u8) -> DateTime<Local> {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32 + tenths as u32 / 100;
    let millis = (tenths as u32 % 100) * 10;

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, minute, second, millis))
        .unwrap_or_else(NaiveDateTime::default);

    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(t, _) => t,
        // A DST gap swallowed the wall-clock time; fall back through UTC
        LocalResult::None => Local.from_utc_datetime(&naive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .unwrap()
    }

    #[test]
    fn known_packing() {
        // 1980-01-01 00:00:00 packs to the all-minimum words
        let (date, time, tenths) = encode_dos_datetime(local(1980, 1, 1, 0, 0, 0));
        assert_eq!(date, (1 << 5) | 1);
        assert_eq!(time, 0);
        assert_eq!(tenths, 0);

        // 2020-07-15 13:45:58
        let (date, time, _) = encode_dos_datetime(local(2020, 7, 15, 13, 45, 58));
        assert_eq!(date >> 9, 40);
        assert_eq!((date >> 5) & 0x0F, 7);
        assert_eq!(date & 0x1F, 15);
        assert_eq!(time >> 11, 13);
        assert_eq!((time >> 5) & 0x3F, 45);
        assert_eq!(time & 0x1F, 29);
    }

    #[test]
    fn round_trip_over_the_representable_range() {
        let samples = [
            local(1980, 1, 1, 0, 0, 0),
            local(1987, 6, 30, 12, 0, 30),
            local(1999, 12, 31, 23, 59, 58),
            local(2024, 2, 29, 8, 15, 44),
            local(2107, 12, 31, 23, 59, 58),
        ];

        for t in samples {
            let (date, time, tenths) = encode_dos_datetime(t);
            assert_eq!(decode_dos_datetime(date, time, tenths), t, "{}", t);
        }
    }

    #[test]
    fn odd_seconds_survive_through_the_tenths_field() {
        let t = local(2001, 3, 9, 10, 20, 31);
        let (date, time, tenths) = encode_dos_datetime(t);
        assert_eq!(time & 0x1F, 15);
        assert_eq!(tenths, 100);
        assert_eq!(decode_dos_datetime(date, time, tenths), t);
    }

    #[test]
    fn years_clamp_to_dos_range() {
        let (date, _, _) = encode_dos_datetime(local(1970, 5, 5, 1, 2, 4));
        assert_eq!(date >> 9, 0);

        let (date, _, _) = encode_dos_datetime(local(2130, 5, 5, 1, 2, 4));
        assert_eq!(date >> 9, 127);
    }

    #[test]
    fn garbage_fields_decode_to_the_epoch() {
        let t = decode_dos_datetime(0, 0, 0);
        assert_eq!(t.naive_local(), NaiveDateTime::default());
    }
}
