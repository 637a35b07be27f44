//! Buddhist-era date fields (YYYYMMDD)

/// Raw value the card stores for documents that never expire
pub const LIFELONG_RAW: &str = "99999999";

/// Offset between the Buddhist era and the Gregorian calendar
pub const BUDDHIST_ERA_OFFSET: i32 = 543;

const THAI_MONTHS: [&str; 12] = [
    "มกราคม",
    "กุมภาพันธ์",
    "มีนาคม",
    "เมษายน",
    "พฤษภาคม",
    "มิถุนายน",
    "กรกฎาคม",
    "สิงหาคม",
    "กันยายน",
    "ตุลาคม",
    "พฤศจิกายน",
    "ธันวาคม",
];

const ENGLISH_MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A date rendered for both supported locales
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedDate {
    /// Thai rendering with the Buddhist-era year
    pub th: String,
    /// English rendering with the Gregorian year
    pub en: String,
}

impl LocalizedDate {
    pub fn lifelong() -> Self {
        Self {
            th: "ตลอดชีพ".to_string(),
            en: "LIFELONG".to_string(),
        }
    }

    pub fn unspecified() -> Self {
        Self {
            th: "ไม่ระบุ".to_string(),
            en: "Not specified".to_string(),
        }
    }
}

/// Parse an 8-digit Buddhist-era `YYYYMMDD` string.
///
/// Anything that is not exactly eight ASCII digits with a month in 1..=12
/// renders as "unspecified". The day is not range checked; the card is
/// trusted for that.
pub fn parse_thai_date(raw: &str) -> LocalizedDate {
    if raw == LIFELONG_RAW {
        return LocalizedDate::lifelong();
    }

    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return LocalizedDate::unspecified();
    }

    let (Ok(year), Ok(month), Ok(day)) = (
        raw[0..4].parse::<i32>(),
        raw[4..6].parse::<usize>(),
        raw[6..8].parse::<u32>(),
    ) else {
        return LocalizedDate::unspecified();
    };

    if !(1..=12).contains(&month) {
        return LocalizedDate::unspecified();
    }

    LocalizedDate {
        th: format!("{} {} {}", day, THAI_MONTHS[month - 1], year),
        en: format!(
            "{} {} {}",
            day,
            ENGLISH_MONTHS[month - 1],
            year - BUDDHIST_ERA_OFFSET
        ),
    }
}
