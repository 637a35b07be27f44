//! Thai ID Card - Smart card reading for Thai national ID cards
//!
//! This crate talks to Thai national ID cards through PC/SC readers: it
//! selects the ID applet, reads and decodes the identity fields, and
//! reassembles the holder's photograph.

pub mod apdu;
pub mod error;
pub mod photo;
pub mod protocol;
pub mod reader;
pub mod record;
pub mod retry;

#[cfg(test)]
mod mock;

pub use error::{CardError, ErrorKind};
pub use photo::{AutoProbe, PhotoOptions, PhotoReader};
pub use protocol::{ReadOptions, ThaiIdCard};
pub use reader::{CardPresence, CardReader, CardSession, PcscSession, ReaderService};
pub use record::CardRecord;

/// Re-export commonly used types
pub use pcsc::Error as PcscError;
