//! Thai ID card read protocol

use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thaiid_common::{
    decode_tis620, format_hex, gender_labels, parse_name, parse_thai_date, Address, Locale,
};
use tracing::{debug, info, warn};

use crate::apdu::{commands, transmit_with_retry};
use crate::error::CardError;
use crate::photo::{PhotoOptions, PhotoReader};
use crate::reader::CardSession;
use crate::record::CardRecord;
use crate::retry::retry_transient;

/// Application Identifiers
pub mod aids {
    /// Thai national ID card applet
    pub const THAI_ID: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x54, 0x48, 0x00, 0x01];
}

/// Location of one fixed-length field in the applet's data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub p1: u8,
    pub p2: u8,
    pub len: u8,
}

impl Field {
    const fn new(name: &'static str, p1: u8, p2: u8, len: u8) -> Self {
        Self { name, p1, p2, len }
    }
}

/// Field table
pub mod fields {
    use super::Field;

    pub const CID: Field = Field::new("cid", 0x00, 0x04, 0x0D);
    pub const NAME_TH: Field = Field::new("name_th", 0x00, 0x11, 0x64);
    pub const NAME_EN: Field = Field::new("name_en", 0x00, 0x75, 0x64);
    pub const BIRTH: Field = Field::new("birth", 0x00, 0xD9, 0x08);
    pub const GENDER: Field = Field::new("gender", 0x00, 0xE1, 0x01);
    pub const ISSUER: Field = Field::new("issuer", 0x00, 0xF6, 0x64);
    pub const ISSUE_DATE: Field = Field::new("issue_date", 0x01, 0x67, 0x08);
    pub const EXPIRE_DATE: Field = Field::new("expire_date", 0x01, 0x6F, 0x08);
    pub const ADDRESS: Field = Field::new("address", 0x15, 0x79, 0x64);
    pub const REQUEST_NUMBER: Field = Field::new("request_number", 0x16, 0x19, 0x0E);

    /// Read order
    pub const ALL: [Field; 10] = [
        CID,
        NAME_TH,
        NAME_EN,
        BIRTH,
        GENDER,
        ISSUER,
        ISSUE_DATE,
        EXPIRE_DATE,
        ADDRESS,
        REQUEST_NUMBER,
    ];
}

/// Tuning knobs for one card read
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Pause after selecting the applet, before the first field read
    pub settle_delay: Duration,
    /// Extra attempts per field on transient faults
    pub field_retries: u32,
    /// Attempts of the whole read on transient faults
    pub read_attempts: u32,
    /// Pause between whole-read attempts
    pub attempt_delay: Duration,
    pub photo: PhotoOptions,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(250),
            field_retries: 2,
            read_attempts: 3,
            attempt_delay: Duration::from_millis(400),
            photo: PhotoOptions::default(),
        }
    }
}

/// Thai ID card interface
pub struct ThaiIdCard<'a, S: CardSession> {
    card: &'a S,
    options: &'a ReadOptions,
}

impl<'a, S: CardSession> ThaiIdCard<'a, S> {
    /// Create a new Thai ID card interface
    pub fn new(card: &'a S, options: &'a ReadOptions) -> Self {
        Self { card, options }
    }

    /// Select the ID card applet. Nothing else can be read before this.
    pub fn select(&self) -> Result<(), CardError> {
        let response = commands::select(aids::THAI_ID).send(self.card)?;

        if !response.is_success() {
            return Err(CardError::SelectFailed {
                sw1: response.sw1,
                sw2: response.sw2,
            });
        }

        debug!(sw = %response.status_string(), "Applet selected");
        Ok(())
    }

    /// Read one field and decode it as TIS-620 text
    pub fn read_field(&self, field: Field) -> Result<String, CardError> {
        let apdu = commands::read_binary(field.p1, field.p2, field.len).build();
        let response = transmit_with_retry(self.card, &apdu, self.options.field_retries)?;

        if !response.is_success() {
            return Err(CardError::Status {
                field: field.name,
                sw1: response.sw1,
                sw2: response.sw2,
            });
        }

        let text = decode_tis620(&response.data);
        debug!(field = field.name, value = %text, "Field read");
        Ok(text)
    }

    /// Select the applet and read every field, plus the photo if enabled
    pub fn read_card_data(&self) -> Result<CardRecord, CardError> {
        let atr = self.card.identification()?;
        debug!(atr = %format_hex(&atr), "Card identified");

        self.select()?;

        if !self.options.settle_delay.is_zero() {
            thread::sleep(self.options.settle_delay);
        }

        let mut record = CardRecord {
            atr: format_hex(&atr),
            cid: self.read_field(fields::CID)?,
            ..Default::default()
        };

        let name_th = parse_name(&self.read_field(fields::NAME_TH)?, Locale::Thai);
        record.full_name_th = name_th.full;
        record.title_th = name_th.title;
        record.name_th = name_th.first;
        record.last_name_th = name_th.last;

        let name_en = parse_name(&self.read_field(fields::NAME_EN)?, Locale::English);
        record.full_name_en = name_en.full;
        record.title_en = name_en.title;
        record.name_en = name_en.first;
        record.last_name_en = name_en.last;

        record.birth_raw = self.read_field(fields::BIRTH)?;
        let birth = parse_thai_date(&record.birth_raw);
        record.birth_th = birth.th;
        record.birth_en = birth.en;

        record.gender = self.read_field(fields::GENDER)?;
        (record.gender_th, record.gender_en) = gender_labels(&record.gender);

        record.issuer = self.read_field(fields::ISSUER)?;

        record.issue_date_raw = self.read_field(fields::ISSUE_DATE)?;
        let issued = parse_thai_date(&record.issue_date_raw);
        record.issue_date_th = issued.th;
        record.issue_date_en = issued.en;

        record.expire_date_raw = self.read_field(fields::EXPIRE_DATE)?;
        let expires = parse_thai_date(&record.expire_date_raw);
        record.expire_date_th = expires.th;
        record.expire_date_en = expires.en;

        let address = Address::parse(&self.read_field(fields::ADDRESS)?);
        record.address = address.full;
        record.address_no = address.house_no;
        record.address_moo = address.moo;
        record.address_tumbol = address.tumbol;
        record.address_amphur = address.amphur;
        record.address_province = address.province;

        record.request_number = self.read_field(fields::REQUEST_NUMBER)?;

        record.photo = self.read_photo();

        Ok(record)
    }

    /// [`Self::read_card_data`] with whole-read retries on transient faults
    pub fn read_card_data_with_retry(&self) -> Result<CardRecord, CardError> {
        let attempts = self.options.read_attempts;

        retry_transient(attempts, self.options.attempt_delay, |attempt| {
            if attempt > 1 {
                info!(attempt, attempts, "Retrying card read");
            }
            self.read_card_data()
        })
    }

    fn read_photo(&self) -> Option<String> {
        if !self.options.photo.enabled {
            return None;
        }

        let reader = PhotoReader::from_options(&self.options.photo);
        match reader.read(self.card) {
            Some(jpeg) => Some(BASE64.encode(jpeg)),
            None => {
                warn!(strategies = ?reader.strategy_names(), "Photo unavailable");
                None
            }
        }
    }
}
