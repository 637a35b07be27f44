//! In-memory card used by the unit tests

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::apdu::CardTransport;
use crate::error::CardError;
use crate::reader::CardSession;

type Responder = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, CardError>>;

/// Card that answers from a script, then from an optional responder.
///
/// Every APDU it receives is recorded for later inspection.
pub struct ScriptedCard {
    script: RefCell<VecDeque<Result<Vec<u8>, pcsc::Error>>>,
    responder: Option<Responder>,
    sent: RefCell<Vec<Vec<u8>>>,
}

impl ScriptedCard {
    pub fn new() -> Self {
        Self {
            script: RefCell::new(VecDeque::new()),
            responder: None,
            sent: RefCell::new(Vec::new()),
        }
    }

    /// Queue a raw response (data followed by SW1 SW2)
    pub fn reply(self, rapdu: Vec<u8>) -> Self {
        self.script.borrow_mut().push_back(Ok(rapdu));
        self
    }

    /// Queue a transport failure
    pub fn fail(self, err: pcsc::Error) -> Self {
        self.script.borrow_mut().push_back(Err(err));
        self
    }

    /// Answer with `f` once the script is exhausted
    pub fn respond_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>, CardError> + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.borrow().clone()
    }
}

impl CardTransport for ScriptedCard {
    fn transmit(&self, apdu: &[u8]) -> Result<Vec<u8>, CardError> {
        self.sent.borrow_mut().push(apdu.to_vec());

        if let Some(next) = self.script.borrow_mut().pop_front() {
            return next.map_err(CardError::from);
        }

        match &self.responder {
            Some(f) => f(apdu),
            None => Err(CardError::from(pcsc::Error::RemovedCard)),
        }
    }
}

impl CardSession for ScriptedCard {
    fn identification(&self) -> Result<Vec<u8>, CardError> {
        Ok(vec![0x3B, 0x67, 0x00, 0x00])
    }

    fn release(&mut self) {}
}

/// Append the success status word to `data`
pub fn ok(mut data: Vec<u8>) -> Vec<u8> {
    data.extend_from_slice(&[0x90, 0x00]);
    data
}
