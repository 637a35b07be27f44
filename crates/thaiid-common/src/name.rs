//! Name fields

use crate::strip_filler;

const THAI_TITLES: &[&str] = &["นาย", "นาง", "นางสาว", "เด็กชาย", "เด็กหญิง"];
const ENGLISH_TITLES: &[&str] = &["Mr.", "Mrs.", "Miss", "Ms.", "Master"];

/// Language of a name field; selects the honorific table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Thai,
    English,
}

impl Locale {
    fn titles(self) -> &'static [&'static str] {
        match self {
            Locale::Thai => THAI_TITLES,
            Locale::English => ENGLISH_TITLES,
        }
    }
}

/// A name split into its parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonName {
    /// Whole name with filler removed
    pub full: String,
    pub title: String,
    pub first: String,
    pub last: String,
}

/// Split a raw card name into title, forename and surname.
///
/// Middle names are dropped. A surname is only reported when at least two
/// tokens remain after the title.
pub fn parse_name(raw: &str, locale: Locale) -> PersonName {
    let full = strip_filler(raw);
    let parts: Vec<&str> = full.split_whitespace().collect();

    let (title, remaining) = match parts.split_first() {
        Some((first, rest)) if locale.titles().contains(first) => (first.to_string(), rest),
        _ => (String::new(), parts.as_slice()),
    };

    let first = remaining.first().map(|s| s.to_string()).unwrap_or_default();
    let last = if remaining.len() >= 2 {
        remaining.last().map(|s| s.to_string()).unwrap_or_default()
    } else {
        String::new()
    };

    PersonName {
        full,
        title,
        first,
        last,
    }
}
