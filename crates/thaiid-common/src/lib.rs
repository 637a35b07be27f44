//! Thai ID Common - Field decoding helpers shared by the card and server crates
//!
//! Everything in this crate is a pure function over raw field bytes or the
//! text decoded from them. Nothing here talks to a reader.

pub mod address;
pub mod date;
pub mod name;

pub use address::Address;
pub use date::{parse_thai_date, LocalizedDate};
pub use name::{parse_name, Locale, PersonName};

use encoding_rs::WINDOWS_874;

/// Decode a TIS-620 encoded card field into a trimmed string.
///
/// Windows-874 is a strict superset of TIS-620, so every byte the card can
/// legally produce maps through it. Anything the table cannot represent is
/// substituted with `?` rather than failing the whole field.
pub fn decode_tis620(data: &[u8]) -> String {
    let (text, _, had_errors) = WINDOWS_874.decode(data);

    let text = if had_errors {
        text.replace('\u{FFFD}', "?")
    } else {
        text.into_owned()
    };

    text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

/// Render bytes as space separated upper-case hex (e.g. "3B 67 00")
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map the card's single digit gender code to Thai and English labels.
///
/// Unknown codes are passed through unchanged in both languages.
pub fn gender_labels(code: &str) -> (String, String) {
    match code {
        "1" => ("ชาย".to_string(), "Male".to_string()),
        "2" => ("หญิง".to_string(), "Female".to_string()),
        other => (other.to_string(), other.to_string()),
    }
}

/// Card text fields pad words with `#` instead of spaces
pub fn strip_filler(raw: &str) -> String {
    raw.replace('#', " ").trim().to_string()
}
