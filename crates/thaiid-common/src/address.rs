//! Address field extraction
//!
//! The card stores the registered address as one `#` separated string, for
//! example `99/1#หมู่ที่ 5#ตำบลบางพูด#อำเภอปากเกร็ด#จังหวัดนนทบุรี`.
//! Bangkok addresses use แขวง/เขต instead of ตำบล/อำเภอ and carry no
//! จังหวัด prefix.

use std::sync::LazyLock;

use regex::Regex;

use crate::strip_filler;

const BANGKOK: &str = "กรุงเทพมหานคร";

static HOUSE_NO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d[\d/]*)").expect("static address pattern"));
static MOO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"หมู่(?:ที่)?\s*(\d+)").expect("static address pattern"));
static TUMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ตำบล(\S+)").expect("static address pattern"));
static AMPHUR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"อำเภอ(\S+)").expect("static address pattern"));
// Bangkok forms only count at the start of a part
static KHWAENG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)แขวง(\S+)").expect("static address pattern"));
static KHET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)เขต(\S+)").expect("static address pattern"));
static PROVINCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"จังหวัด(\S+)").expect("static address pattern"));

/// Registered address split into its administrative parts.
///
/// Parts that cannot be found are left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    /// Whole address with filler removed
    pub full: String,
    pub house_no: String,
    pub moo: String,
    pub tumbol: String,
    pub amphur: String,
    pub province: String,
}

impl Address {
    pub fn parse(raw: &str) -> Self {
        let full = strip_filler(raw);

        let capture = |re: &Regex| {
            re.captures(&full)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        let either = |primary: &Regex, bangkok: &Regex| {
            let found = capture(primary);
            if found.is_empty() {
                capture(bangkok)
            } else {
                found
            }
        };

        let mut province = capture(&PROVINCE);
        if province.is_empty() && full.contains(BANGKOK) {
            province = BANGKOK.to_string();
        }

        Self {
            house_no: capture(&HOUSE_NO),
            moo: capture(&MOO),
            tumbol: either(&TUMBOL, &KHWAENG),
            amphur: either(&AMPHUR, &KHET),
            province,
            full,
        }
    }
}
