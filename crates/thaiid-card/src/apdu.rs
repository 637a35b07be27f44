//! APDU (Application Protocol Data Unit) command handling

use std::time::Duration;

use tracing::trace;

use crate::error::CardError;
use crate::retry::retry_transient;

/// SW1 value announcing that more response bytes are waiting (61xx)
pub const SW1_MORE_DATA: u8 = 0x61;

/// Pause between attempts of a single transaction
pub const TRANSMIT_RETRY_DELAY: Duration = Duration::from_millis(150);

/// Anything that can exchange raw APDUs with a card.
///
/// `transmit` returns the full response, status word included.
pub trait CardTransport {
    fn transmit(&self, apdu: &[u8]) -> Result<Vec<u8>, CardError>;
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Check if the response indicates success (90xx)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Send an APDU command to the card and split off the status word
pub fn send_apdu<C: CardTransport + ?Sized>(card: &C, apdu: &[u8]) -> Result<ApduResponse, CardError> {
    let rapdu = card.transmit(apdu)?;

    if rapdu.len() < 2 {
        return Err(CardError::ShortResponse(rapdu.len()));
    }

    let sw1 = rapdu[rapdu.len() - 2];
    let sw2 = rapdu[rapdu.len() - 1];
    let data = rapdu[..rapdu.len() - 2].to_vec();

    Ok(ApduResponse { data, sw1, sw2 })
}

/// Send an APDU and follow a 61xx continuation.
///
/// When the card answers 61xx, exactly one GET RESPONSE for xx bytes is
/// issued and its response is returned in place of the first one.
pub fn transmit<C: CardTransport + ?Sized>(card: &C, apdu: &[u8]) -> Result<ApduResponse, CardError> {
    let response = send_apdu(card, apdu)?;
    trace!(sw = %response.status_string(), len = response.data.len(), "APDU exchanged");

    if response.sw1 == SW1_MORE_DATA {
        let follow_up = commands::get_response(response.sw2).build();
        let response = send_apdu(card, &follow_up)?;
        trace!(sw = %response.status_string(), len = response.data.len(), "GET RESPONSE exchanged");
        return Ok(response);
    }

    Ok(response)
}

/// [`transmit`] with up to `max_retries` extra attempts on transient faults.
///
/// Status words are never retried; they come back as data.
pub fn transmit_with_retry<C: CardTransport + ?Sized>(
    card: &C,
    apdu: &[u8],
    max_retries: u32,
) -> Result<ApduResponse, CardError> {
    retry_transient(max_retries + 1, TRANSMIT_RETRY_DELAY, |_| transmit(card, apdu))
}

/// APDU command builder
#[derive(Debug, Clone)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }

    /// Send this command, following any 61xx continuation
    pub fn send<C: CardTransport + ?Sized>(&self, card: &C) -> Result<ApduResponse, CardError> {
        transmit(card, &self.build())
    }
}

/// APDU commands understood by the Thai ID card applet
pub mod commands {
    use super::ApduCommand;

    /// SELECT command (by AID, no Le)
    pub fn select(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x00).data(aid.to_vec())
    }

    /// Proprietary READ BINARY: `80 B0 P1 P2 02 00 len`
    pub fn read_binary(p1: u8, p2: u8, len: u8) -> ApduCommand {
        ApduCommand::new(0x80, 0xB0, p1, p2).data(vec![0x00, len])
    }

    /// GET RESPONSE for the bytes announced by a 61xx status
    pub fn get_response(len: u8) -> ApduCommand {
        ApduCommand::new(0x00, 0xC0, 0x00, 0x00).le(len)
    }
}
