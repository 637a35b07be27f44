//! Messages pushed to subscribers

use chrono::Utc;
use serde::Serialize;
use thaiid_card::{CardError, CardRecord};

/// Wire format version carried by every message
pub const MESSAGE_VERSION: &str = "1.0";

/// Prefix of every read failure message ("card read failed")
const READ_FAILED: &str = "อ่านบัตรไม่สำเร็จ";

/// Reader availability as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderStatus {
    Found,
    NotFound,
}

/// One message for subscribers, stamped when it was produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub version: &'static str,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ReaderStatus {
        status: ReaderStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reader_name: Option<String>,
    },
    CardData {
        reader_name: String,
        data: Box<CardRecord>,
    },
    Error {
        reader_name: String,
        message: String,
        error_code: Option<&'static str>,
        retry_attempts: u32,
    },
}

fn now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl PresenceEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            version: MESSAGE_VERSION,
            timestamp: now(),
        }
    }

    pub fn reader_found(reader_name: &str) -> Self {
        Self::new(EventPayload::ReaderStatus {
            status: ReaderStatus::Found,
            reader_name: Some(reader_name.to_string()),
        })
    }

    pub fn reader_not_found() -> Self {
        Self::new(EventPayload::ReaderStatus {
            status: ReaderStatus::NotFound,
            reader_name: None,
        })
    }

    pub fn card_data(reader_name: &str, record: CardRecord) -> Self {
        Self::new(EventPayload::CardData {
            reader_name: reader_name.to_string(),
            data: Box::new(record),
        })
    }

    /// Read failure after `retry_attempts` whole-read attempts
    pub fn read_failed(reader_name: &str, err: &CardError, retry_attempts: u32) -> Self {
        Self::new(EventPayload::Error {
            reader_name: reader_name.to_string(),
            message: format!("{READ_FAILED}: {err}"),
            error_code: err.kind().code(),
            retry_attempts,
        })
    }

    /// The reader status carried by this event, if it is a status event
    pub fn reader_status(&self) -> Option<ReaderStatus> {
        match &self.payload {
            EventPayload::ReaderStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn json(event: &PresenceEvent) -> Value {
        serde_json::from_str(&event.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_reader_found_shape() {
        let value = json(&PresenceEvent::reader_found("ACS ACR39U"));

        assert_eq!(value["type"], "reader_status");
        assert_eq!(value["status"], "found");
        assert_eq!(value["reader_name"], "ACS ACR39U");
        assert_eq!(value["version"], "1.0");
        assert!(value["timestamp"].as_f64().unwrap() > 1_600_000_000.0);
    }

    #[test]
    fn test_reader_not_found_omits_name() {
        let value = json(&PresenceEvent::reader_not_found());

        assert_eq!(value["status"], "not_found");
        assert!(value.get("reader_name").is_none());
    }

    #[test]
    fn test_card_data_shape() {
        let record = CardRecord {
            cid: "1101700203451".to_string(),
            name_th: "สมชาย".to_string(),
            ..Default::default()
        };
        let event = PresenceEvent::card_data("reader 0", record);
        let text = event.to_json().unwrap();

        // Thai text goes out unescaped
        assert!(text.contains("สมชาย"));

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "card_data");
        assert_eq!(value["reader_name"], "reader 0");
        assert_eq!(value["data"]["cid"], "1101700203451");
        assert!(value["data"]["photo"].is_null());
        assert!(event.reader_status().is_none());
    }

    #[test]
    fn test_error_codes() {
        let comm = CardError::from(thaiid_card::PcscError::CommError);
        let value = json(&PresenceEvent::read_failed("r", &comm, 3));
        assert_eq!(value["type"], "error");
        assert_eq!(value["error_code"], "SCARD_COMM_ERROR");
        assert_eq!(value["retry_attempts"], 3);
        assert!(value["message"].as_str().unwrap().starts_with(READ_FAILED));

        let reset = CardError::from(thaiid_card::PcscError::ResetCard);
        assert_eq!(json(&PresenceEvent::read_failed("r", &reset, 3))["error_code"], "SCARD_W_RESET_CARD");

        let select = CardError::SelectFailed { sw1: 0x6A, sw2: 0x82 };
        assert_eq!(json(&PresenceEvent::read_failed("r", &select, 3))["error_code"], "APPLET_SELECT_FAILED");

        let status = CardError::Status {
            field: "cid",
            sw1: 0x6B,
            sw2: 0x00,
        };
        assert!(json(&PresenceEvent::read_failed("r", &status, 3))["error_code"].is_null());
    }
}
