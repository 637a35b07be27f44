//! PC/SC card reader management

use std::ffi::CString;
use std::time::Duration;

use pcsc::{Attribute, Card, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::{debug, warn};

use crate::apdu::CardTransport;
use crate::error::CardError;

/// Card presence a caller is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPresence {
    Present,
    Absent,
}

/// A connected card. Only one exists at a time.
pub trait CardSession: CardTransport {
    /// The card's reset-time identifier (ATR)
    fn identification(&self) -> Result<Vec<u8>, CardError>;

    /// Disconnect from the card. Safe to call more than once; errors are
    /// logged and swallowed.
    fn release(&mut self);
}

/// Reader enumeration, presence polling and connection
pub trait ReaderService {
    type Session: CardSession;

    /// Names of the currently attached readers
    fn list_readers(&mut self) -> Result<Vec<String>, CardError>;

    /// Wait up to `timeout` for the card in `reader` to reach `wanted`.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    fn wait_for(&mut self, reader: &str, wanted: CardPresence, timeout: Duration) -> Result<bool, CardError>;

    /// Connect to the card in `reader` (T=0 or T=1, shared)
    fn connect(&mut self, reader: &str) -> Result<Self::Session, CardError>;
}

/// Card reader wrapper for managing PC/SC connections.
///
/// The PC/SC context is established lazily and dropped again when the
/// service reports it invalid, so a restarted service is picked up on the
/// next call.
pub struct CardReader {
    context: Option<Context>,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, CardError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self {
            context: Some(context),
        })
    }

    /// Create a CardReader that establishes its context on first use
    pub fn lazy() -> Self {
        Self { context: None }
    }

    fn with_context<T, F>(&mut self, f: F) -> Result<T, CardError>
    where
        F: FnOnce(&Context) -> Result<T, pcsc::Error>,
    {
        let context = match self.context.take() {
            Some(context) => context,
            None => Context::establish(Scope::User)?,
        };

        let result = f(&context);

        match &result {
            Err(err) if invalidates_context(err) => {
                debug!(error = %err, "Dropping PC/SC context");
            }
            _ => self.context = Some(context),
        }

        result.map_err(CardError::from)
    }

    /// Connect to the first available reader
    pub fn connect_first(&mut self) -> Result<(PcscSession, String), CardError> {
        let reader_name = self
            .list_readers()?
            .into_iter()
            .next()
            .ok_or_else(|| CardError::from(pcsc::Error::NoReadersAvailable))?;

        let session = self.connect(&reader_name)?;
        Ok((session, reader_name))
    }
}

fn invalidates_context(err: &pcsc::Error) -> bool {
    matches!(
        err,
        pcsc::Error::NoService | pcsc::Error::ServiceStopped | pcsc::Error::InvalidHandle
    )
}

fn reader_cstring(reader: &str) -> Result<CString, CardError> {
    CString::new(reader).map_err(|_| CardError::ReaderLost(reader.to_string()))
}

fn matches_presence(state: State, wanted: CardPresence) -> bool {
    match wanted {
        CardPresence::Present => state.contains(State::PRESENT),
        CardPresence::Absent => state.contains(State::EMPTY),
    }
}

impl ReaderService for CardReader {
    type Session = PcscSession;

    fn list_readers(&mut self) -> Result<Vec<String>, CardError> {
        let result = self.with_context(|context| {
            let mut readers_buf = [0; 2048];
            let readers = context.list_readers(&mut readers_buf)?;

            Ok(readers
                .map(|r| r.to_str().unwrap_or("Unknown").to_string())
                .collect::<Vec<_>>())
        });

        match result {
            Err(err) if matches!(err, CardError::Pcsc { source: pcsc::Error::NoReadersAvailable, .. }) => Ok(Vec::new()),
            other => other,
        }
    }

    fn wait_for(&mut self, reader: &str, wanted: CardPresence, timeout: Duration) -> Result<bool, CardError> {
        let name = reader_cstring(reader)?;

        let state = self.with_context(|context| {
            let mut states = [ReaderState::new(name, State::UNAWARE)];
            context.get_status_change(Duration::ZERO, &mut states)?;

            let current = states[0].event_state();
            if matches_presence(current, wanted) || current.intersects(State::UNKNOWN | State::UNAVAILABLE) {
                return Ok(current);
            }

            states[0].sync_current_state();
            match context.get_status_change(timeout, &mut states) {
                Ok(()) => Ok(states[0].event_state()),
                Err(pcsc::Error::Timeout) => Ok(current),
                Err(err) => Err(err),
            }
        })?;

        if state.intersects(State::UNKNOWN | State::UNAVAILABLE) {
            return Err(CardError::ReaderLost(reader.to_string()));
        }

        Ok(matches_presence(state, wanted))
    }

    fn connect(&mut self, reader: &str) -> Result<PcscSession, CardError> {
        let name = reader_cstring(reader)?;
        let card = self.with_context(|context| {
            context.connect(&name, ShareMode::Shared, Protocols::T0 | Protocols::T1)
        })?;

        debug!(reader = %reader, "Card connected");
        Ok(PcscSession { card: Some(card) })
    }
}

/// A card connected through PC/SC
pub struct PcscSession {
    card: Option<Card>,
}

impl PcscSession {
    fn card(&self) -> Result<&Card, CardError> {
        self.card.as_ref().ok_or(CardError::SessionReleased)
    }
}

impl CardTransport for PcscSession {
    fn transmit(&self, apdu: &[u8]) -> Result<Vec<u8>, CardError> {
        let mut rapdu_buf = [0; pcsc::MAX_BUFFER_SIZE];
        let rapdu = self.card()?.transmit(apdu, &mut rapdu_buf)?;
        Ok(rapdu.to_vec())
    }
}

impl CardSession for PcscSession {
    fn identification(&self) -> Result<Vec<u8>, CardError> {
        Ok(self.card()?.get_attribute_owned(Attribute::AtrString)?)
    }

    fn release(&mut self) {
        if let Some(card) = self.card.take() {
            match card.disconnect(Disposition::LeaveCard) {
                Ok(()) => debug!("Card disconnected"),
                Err((_, err)) => warn!(error = %err, "Card disconnect failed"),
            }
        }
    }
}

impl Drop for PcscSession {
    fn drop(&mut self) {
        self.release();
    }
}
