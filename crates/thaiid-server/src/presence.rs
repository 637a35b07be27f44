//! Reader and card presence tracking
//!
//! A blocking state machine that follows one reader through attach, card
//! insertion, read and removal, and turns what it sees into
//! [`PresenceEvent`]s. It never gives up on a read fault; it only stops once
//! nobody is listening for events anymore.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use thaiid_card::retry::retry_transient;
use thaiid_card::{CardPresence, CardSession, ReadOptions, ReaderService, ThaiIdCard};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::events::{PresenceEvent, ReaderStatus};

/// Poll intervals and hardware wait timeouts
#[derive(Debug, Clone)]
pub struct PresenceTiming {
    /// Pause between reader enumerations while no reader is attached
    pub seek_interval: Duration,
    pub insert_timeout: Duration,
    /// Pause after an insertion wait that saw nothing
    pub idle_pause: Duration,
    pub reader_lost_pause: Duration,
    pub removal_timeout: Duration,
    /// Pause between removal checks while the card is still in
    pub removal_poll: Duration,
}

impl Default for PresenceTiming {
    fn default() -> Self {
        Self {
            seek_interval: Duration::from_secs(2),
            insert_timeout: Duration::from_secs(1),
            idle_pause: Duration::from_millis(300),
            reader_lost_pause: Duration::from_secs(1),
            removal_timeout: Duration::from_secs(1),
            removal_poll: Duration::from_millis(500),
        }
    }
}

impl PresenceTiming {
    /// No pauses at all
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            seek_interval: Duration::ZERO,
            insert_timeout: Duration::ZERO,
            idle_pause: Duration::ZERO,
            reader_lost_pause: Duration::ZERO,
            removal_timeout: Duration::ZERO,
            removal_poll: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceState {
    SeekingReader,
    AwaitingCard { reader: String },
    CardPresent { reader: String },
    AwaitingRemoval { reader: String },
}

type StepResult = Result<(), SendError<PresenceEvent>>;

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

pub struct PresenceMachine<R: ReaderService> {
    service: R,
    options: ReadOptions,
    timing: PresenceTiming,
    events: UnboundedSender<PresenceEvent>,
    state: PresenceState,
    last_status: Option<ReaderStatus>,
}

impl<R: ReaderService> PresenceMachine<R> {
    pub fn new(service: R, options: ReadOptions, timing: PresenceTiming, events: UnboundedSender<PresenceEvent>) -> Self {
        Self {
            service,
            options,
            timing,
            events,
            state: PresenceState::SeekingReader,
            last_status: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// Run until the event receiver goes away
    pub fn run(mut self) {
        info!("Presence worker started");

        while self.step().is_ok() {}

        info!("Event channel closed, presence worker stopping");
    }

    /// Advance by one state. Fails only if the event receiver is gone.
    pub fn step(&mut self) -> StepResult {
        if self.events.is_closed() {
            return Err(SendError(PresenceEvent::reader_not_found()));
        }

        match self.state.clone() {
            PresenceState::SeekingReader => self.seek_reader(),
            PresenceState::AwaitingCard { reader } => self.await_card(reader),
            PresenceState::CardPresent { reader } => self.read_card(reader),
            PresenceState::AwaitingRemoval { reader } => {
                self.await_removal(reader);
                Ok(())
            }
        }
    }

    fn seek_reader(&mut self) -> StepResult {
        let readers = self.service.list_readers().unwrap_or_else(|err| {
            debug!(error = %err, "Reader enumeration failed");
            Vec::new()
        });

        match readers.into_iter().next() {
            Some(reader) => {
                info!(reader = %reader, "Reader found");
                self.emit_status(PresenceEvent::reader_found(&reader))?;
                self.state = PresenceState::AwaitingCard { reader };
            }
            None => {
                self.emit_status(PresenceEvent::reader_not_found())?;
                pause(self.timing.seek_interval);
            }
        }
        Ok(())
    }

    fn await_card(&mut self, reader: String) -> StepResult {
        match self.service.wait_for(&reader, CardPresence::Present, self.timing.insert_timeout) {
            Ok(true) => {
                info!(reader = %reader, "Card inserted");
                self.state = PresenceState::CardPresent { reader };
            }
            Ok(false) => pause(self.timing.idle_pause),
            Err(err) => {
                let still_listed = self
                    .service
                    .list_readers()
                    .map(|readers| readers.contains(&reader))
                    .unwrap_or(false);

                if still_listed {
                    debug!(reader = %reader, error = %err, "Insertion wait failed");
                    pause(self.timing.idle_pause);
                } else {
                    warn!(reader = %reader, error = %err, "Reader lost");
                    self.emit_status(PresenceEvent::reader_not_found())?;
                    self.state = PresenceState::SeekingReader;
                    pause(self.timing.reader_lost_pause);
                }
            }
        }
        Ok(())
    }

    fn read_card(&mut self, reader: String) -> StepResult {
        let attempts = self.options.read_attempts;
        let service = &mut self.service;
        let connected = retry_transient(attempts, self.options.attempt_delay, |attempt| {
            if attempt > 1 {
                debug!(reader = %reader, attempt, "Retrying card connect");
            }
            service.connect(&reader)
        });

        let event = match connected {
            Ok(mut session) => {
                let result = ThaiIdCard::new(&session, &self.options).read_card_data_with_retry();
                session.release();

                match result {
                    Ok(record) => {
                        info!(reader = %reader, "Card read");
                        PresenceEvent::card_data(&reader, record)
                    }
                    Err(err) => {
                        warn!(reader = %reader, error = %err, code = ?err.kind().code(), "Card read failed");
                        PresenceEvent::read_failed(&reader, &err, attempts)
                    }
                }
            }
            Err(err) => {
                warn!(reader = %reader, error = %err, "Card connect failed");
                PresenceEvent::read_failed(&reader, &err, attempts)
            }
        };

        self.events.send(event)?;
        self.state = PresenceState::AwaitingRemoval { reader };
        Ok(())
    }

    fn await_removal(&mut self, reader: String) {
        match self.service.wait_for(&reader, CardPresence::Absent, self.timing.removal_timeout) {
            Ok(false) => pause(self.timing.removal_poll),
            Ok(true) => {
                info!(reader = %reader, "Card removed");
                self.state = PresenceState::AwaitingCard { reader };
            }
            Err(err) => {
                debug!(reader = %reader, error = %err, "Removal wait failed");
                self.state = PresenceState::AwaitingCard { reader };
            }
        }
    }

    /// Send a reader status event unless it repeats the last one sent
    fn emit_status(&mut self, event: PresenceEvent) -> StepResult {
        let status = event.reader_status();
        if status.is_some() && status == self.last_status {
            return Ok(());
        }

        self.events.send(event)?;
        self.last_status = status;
        Ok(())
    }
}

/// Runs a [`PresenceMachine`] on its own thread
pub struct PresenceWorker;

impl PresenceWorker {
    /// Spawn the worker. The reader service is created on the worker thread.
    pub fn spawn<R, F>(
        make_service: F,
        options: ReadOptions,
        timing: PresenceTiming,
        events: UnboundedSender<PresenceEvent>,
    ) -> std::io::Result<JoinHandle<()>>
    where
        R: ReaderService,
        F: FnOnce() -> R + Send + 'static,
    {
        thread::Builder::new()
            .name("presence".to_string())
            .spawn(move || PresenceMachine::new(make_service(), options, timing, events).run())
    }
}
