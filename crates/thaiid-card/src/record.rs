//! Identity record assembled from one card read

use serde::Serialize;

/// Everything read from one card, keyed the way subscribers receive it.
///
/// Dates come as the raw card string plus Thai and English renderings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CardRecord {
    /// 13-digit national ID number
    pub cid: String,

    pub full_name_th: String,
    pub title_th: String,
    pub name_th: String,
    pub last_name_th: String,

    pub full_name_en: String,
    pub title_en: String,
    pub name_en: String,
    pub last_name_en: String,

    pub birth_raw: String,
    pub birth_th: String,
    pub birth_en: String,

    /// Raw gender code ("1" male, "2" female)
    pub gender: String,
    pub gender_th: String,
    pub gender_en: String,

    /// Issuing authority
    pub issuer: String,

    pub issue_date_raw: String,
    pub issue_date_th: String,
    pub issue_date_en: String,

    pub expire_date_raw: String,
    pub expire_date_th: String,
    pub expire_date_en: String,

    pub address: String,
    pub address_no: String,
    pub address_moo: String,
    pub address_tumbol: String,
    pub address_amphur: String,
    pub address_province: String,

    pub request_number: String,

    /// Base64 encoded JPEG, absent if no photo strategy succeeded
    pub photo: Option<String>,

    /// Card ATR as space separated hex
    pub atr: String,
}
