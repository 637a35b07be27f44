//! Photograph reconstruction
//!
//! The card stores the holder's photo as a JPEG with no length field, so the
//! only way to know where it ends is the JPEG framing itself. Different card
//! generations keep it in slightly different places, hence a chain of
//! strategies tried in order until one produces an image.

use tracing::debug;

use crate::apdu::{commands, CardTransport};

/// JPEG start-of-image marker
pub const START_MARKER: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
pub const END_MARKER: [u8; 2] = [0xFF, 0xD9];

/// Chunk length used by the fixed part table
pub const PART_LEN: u8 = 0xFF;

/// Offsets (P1, P2) of the 20 photo parts on current cards.
///
/// Consecutive parts are `PART_LEN` bytes apart.
pub const PHOTO_PARTS: [(u8, u8); 20] = [
    (0x01, 0x7B),
    (0x02, 0x7A),
    (0x03, 0x79),
    (0x04, 0x78),
    (0x05, 0x77),
    (0x06, 0x76),
    (0x07, 0x75),
    (0x08, 0x74),
    (0x09, 0x73),
    (0x0A, 0x72),
    (0x0B, 0x71),
    (0x0C, 0x70),
    (0x0D, 0x6F),
    (0x0E, 0x6E),
    (0x0F, 0x6D),
    (0x10, 0x6C),
    (0x11, 0x6B),
    (0x12, 0x6A),
    (0x13, 0x69),
    (0x14, 0x68),
];

/// A JPEG is accepted when it starts with the SOI marker. A missing EOI is
/// tolerated; clients can usually still decode a truncated image.
pub fn is_acceptable(data: &[u8]) -> bool {
    data.len() > 4 && data.starts_with(&START_MARKER)
}

/// One way of locating and assembling the photo
pub trait PhotoStrategy {
    fn name(&self) -> &'static str;

    /// Assembled bytes, or `None` if this strategy found nothing usable
    fn assemble(&self, card: &dyn CardTransport) -> Option<Vec<u8>>;
}

/// Read the hard-coded part table in order
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedParts;

impl PhotoStrategy for FixedParts {
    fn name(&self) -> &'static str {
        "fixed-parts"
    }

    fn assemble(&self, card: &dyn CardTransport) -> Option<Vec<u8>> {
        let mut data = Vec::new();

        for (index, &(p1, p2)) in PHOTO_PARTS.iter().enumerate() {
            let response = match commands::read_binary(p1, p2, PART_LEN).send(card) {
                Ok(response) => response,
                Err(err) => {
                    debug!(part = index + 1, error = %err, "Photo part transmit error");
                    return None;
                }
            };

            if !response.is_success() {
                debug!(part = index + 1, sw = %response.status_string(), "Photo part rejected");
                return None;
            }

            data.extend_from_slice(&response.data);
        }

        is_acceptable(&data).then_some(data)
    }
}

/// Read sequential chunks from a known start offset until the EOI marker
#[derive(Debug, Clone, Copy)]
pub struct OffsetScan {
    /// Start offset as (P1, P2)
    pub start: (u8, u8),
    pub chunk_len: u8,
    pub max_chunks: u32,
}

impl OffsetScan {
    pub fn new(start: (u8, u8), chunk_len: u8, max_chunks: u32) -> Self {
        Self {
            start,
            chunk_len,
            max_chunks,
        }
    }
}

impl PhotoStrategy for OffsetScan {
    fn name(&self) -> &'static str {
        "offset-scan"
    }

    fn assemble(&self, card: &dyn CardTransport) -> Option<Vec<u8>> {
        let start = u32::from(u16::from_be_bytes([self.start.0, self.start.1]));
        let mut data = Vec::new();

        for chunk in 0..self.max_chunks {
            let offset = start + chunk * u32::from(self.chunk_len);
            if offset > 0xFFFF {
                break;
            }
            let [p1, p2] = (offset as u16).to_be_bytes();

            let response = match commands::read_binary(p1, p2, self.chunk_len).send(card) {
                Ok(response) => response,
                Err(err) => {
                    debug!(chunk, error = %err, "Photo chunk transmit error");
                    break;
                }
            };

            if !response.is_success() {
                debug!(chunk, sw = %response.status_string(), "Photo chunk rejected");
                break;
            }

            data.extend_from_slice(&response.data);
            debug!(chunk, size = response.data.len(), total = data.len(), "Photo chunk read");

            if data.ends_with(&END_MARKER) {
                debug!("Photo end marker found");
                break;
            }
        }

        is_acceptable(&data).then_some(data)
    }
}

/// Probe a grid of offsets for the SOI marker, then scan from there.
///
/// The coordinate handed to the scan is the start of the probe block that
/// contained the marker, not the marker itself. When the marker sits inside
/// the block (or straddles two blocks) the scan still starts a little early
/// and the result may carry leading bytes that fail [`is_acceptable`].
#[derive(Debug, Clone, Copy)]
pub struct AutoProbe {
    pub p1_start: u8,
    pub p1_end: u8,
    pub p2_step: u8,
    pub probe_len: u8,
    pub chunk_len: u8,
    pub max_chunks: u32,
}

impl Default for AutoProbe {
    fn default() -> Self {
        Self {
            p1_start: 0x15,
            p1_end: 0x20,
            p2_step: 0x20,
            probe_len: 0x40,
            chunk_len: PART_LEN,
            max_chunks: 40,
        }
    }
}

impl AutoProbe {
    /// Find the first probe block containing the SOI marker
    pub fn locate(&self, card: &dyn CardTransport) -> Option<(u8, u8)> {
        let step = usize::from(self.p2_step.max(1));

        for p1 in self.p1_start..=self.p1_end {
            for p2 in (0x00..=0xFFu8).step_by(step) {
                let response = match commands::read_binary(p1, p2, self.probe_len).send(card) {
                    Ok(response) => response,
                    Err(err) => {
                        debug!(p1, p2, error = %err, "Photo probe transmit error");
                        continue;
                    }
                };

                if !response.is_success() || response.data.is_empty() {
                    continue;
                }

                if response.data.windows(2).any(|w| w == &START_MARKER[..]) {
                    return Some((p1, p2));
                }
            }
        }

        None
    }
}

impl PhotoStrategy for AutoProbe {
    fn name(&self) -> &'static str {
        "auto-probe"
    }

    fn assemble(&self, card: &dyn CardTransport) -> Option<Vec<u8>> {
        let start = self.locate(card)?;
        debug!(p1 = start.0, p2 = start.1, "Photo start marker located");
        OffsetScan::new(start, self.chunk_len, self.max_chunks).assemble(card)
    }
}

/// Which strategies to run and how
#[derive(Debug, Clone)]
pub struct PhotoOptions {
    /// Read the photo at all
    pub enabled: bool,
    /// Try the fixed part table first
    pub fixed_parts: bool,
    /// Known start offset for [`OffsetScan`]
    pub start_offset: Option<(u8, u8)>,
    pub chunk_len: u8,
    pub max_chunks: u32,
    /// Grid for [`AutoProbe`]; probing is off when `None`
    pub probe: Option<AutoProbe>,
}

impl Default for PhotoOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            fixed_parts: true,
            start_offset: None,
            chunk_len: PART_LEN,
            max_chunks: 40,
            probe: None,
        }
    }
}

/// Ordered strategy chain; the first acceptable image wins
pub struct PhotoReader {
    strategies: Vec<Box<dyn PhotoStrategy>>,
}

impl PhotoReader {
    pub fn new(strategies: Vec<Box<dyn PhotoStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_options(options: &PhotoOptions) -> Self {
        let mut strategies: Vec<Box<dyn PhotoStrategy>> = Vec::new();

        if !options.enabled {
            return Self::new(strategies);
        }

        if options.fixed_parts {
            strategies.push(Box::new(FixedParts));
        }
        if let Some(start) = options.start_offset {
            strategies.push(Box::new(OffsetScan::new(start, options.chunk_len, options.max_chunks)));
        }
        if let Some(probe) = options.probe {
            strategies.push(Box::new(probe));
        }

        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain. `None` means no strategy produced a photo.
    pub fn read(&self, card: &dyn CardTransport) -> Option<Vec<u8>> {
        for strategy in &self.strategies {
            match strategy.assemble(card) {
                Some(data) if is_acceptable(&data) => {
                    debug!(strategy = strategy.name(), size = data.len(), "Photo assembled");
                    return Some(data);
                }
                _ => debug!(strategy = strategy.name(), "Photo strategy found nothing"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CardError;
    use crate::mock::{ok, ScriptedCard};

    /// Card whose photo area is `image` starting at 16-bit offset `base`
    fn card_with_image(base: u16, image: Vec<u8>) -> ScriptedCard {
        ScriptedCard::new().respond_with(move |apdu| {
            let offset = u16::from_be_bytes([apdu[2], apdu[3]]) as usize;
            let len = apdu[6] as usize;
            let base = base as usize;
            if offset < base {
                return Ok(ok(vec![0x00; len]));
            }
            let from = (offset - base).min(image.len());
            let to = (from + len).min(image.len());
            Ok(ok(image[from..to].to_vec()))
        })
    }

    #[test]
    fn test_part_table_is_contiguous() {
        for pair in PHOTO_PARTS.windows(2) {
            let a = u16::from_be_bytes([pair[0].0, pair[0].1]);
            let b = u16::from_be_bytes([pair[1].0, pair[1].1]);
            assert_eq!(b - a, PART_LEN as u16);
        }
    }

    #[test]
    fn test_is_acceptable() {
        assert!(is_acceptable(&[0xFF, 0xD8, 0x00, 0x00, 0xFF]));
        assert!(!is_acceptable(&[0xFF, 0xD8, 0xFF, 0xD9]));
        assert!(!is_acceptable(&[0x00, 0xFF, 0xD8, 0x00, 0x00]));
    }

    #[test]
    fn test_fixed_parts_concatenates_in_order() {
        let card = ScriptedCard::new().respond_with(|apdu| {
            let mut part = vec![apdu[2]; 3];
            if apdu[2] == 0x01 {
                part = vec![0xFF, 0xD8, 0x01];
            }
            Ok(ok(part))
        });

        let data = FixedParts.assemble(&card).unwrap();
        assert_eq!(data.len(), 60);
        assert_eq!(&data[..3], &[0xFF, 0xD8, 0x01]);
        assert_eq!(&data[57..], &[0x14, 0x14, 0x14]);

        let sent = card.sent();
        assert_eq!(sent.len(), 20);
        assert_eq!(sent[0], vec![0x80, 0xB0, 0x01, 0x7B, 0x02, 0x00, 0xFF]);
        assert_eq!(sent[19], vec![0x80, 0xB0, 0x14, 0x68, 0x02, 0x00, 0xFF]);
    }

    #[test]
    fn test_fixed_parts_aborts_on_status() {
        let card = ScriptedCard::new()
            .reply(ok(vec![0xFF, 0xD8, 0x00, 0x00, 0x00]))
            .reply(vec![0x6B, 0x00]);

        assert!(FixedParts.assemble(&card).is_none());
        assert_eq!(card.sent().len(), 2);
    }

    #[test]
    fn test_fixed_parts_aborts_on_transmit_error() {
        let card = ScriptedCard::new()
            .reply(ok(vec![0xFF, 0xD8, 0x00, 0x00, 0x00]))
            .fail(pcsc::Error::CommError);

        assert!(FixedParts.assemble(&card).is_none());
        assert_eq!(card.sent().len(), 2);
    }

    #[test]
    fn test_scan_stops_at_end_marker() {
        let card = ScriptedCard::new()
            .reply(ok(vec![0xFF, 0xD8, 0x10, 0x11]))
            .reply(ok(vec![0x12, 0x13, 0x14, 0x15]))
            .reply(ok(vec![0x16, 0x17, 0xFF, 0xD9]))
            .reply(ok(vec![0xEE, 0xEE, 0xEE, 0xEE]));

        let data = OffsetScan::new((0x17, 0xA9), 4, 40).assemble(&card).unwrap();

        assert_eq!(
            data,
            vec![0xFF, 0xD8, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0xFF, 0xD9]
        );
        assert_eq!(card.sent().len(), 3);
    }

    #[test]
    fn test_scan_advances_sixteen_bit_offset() {
        let card = ScriptedCard::new()
            .reply(ok(vec![0xFF, 0xD8, 0x00, 0x00]))
            .reply(ok(vec![0x00, 0x00, 0xFF, 0xD9]));

        OffsetScan::new((0x01, 0x7B), PART_LEN, 40).assemble(&card).unwrap();

        let sent = card.sent();
        assert_eq!(&sent[0][2..4], &[0x01, 0x7B]);
        assert_eq!(&sent[1][2..4], &[0x02, 0x7A]);
    }

    #[test]
    fn test_scan_stops_on_offset_overflow() {
        let card = ScriptedCard::new().respond_with(|_| Ok(ok(vec![0xFF, 0xD8, 0x00, 0x00])));

        let data = OffsetScan::new((0xFF, 0x00), 0x80, 40).assemble(&card).unwrap();

        // 0xFF00 and 0xFF80 fit, 0x10000 does not
        assert_eq!(card.sent().len(), 2);
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn test_scan_respects_max_chunks() {
        let card = ScriptedCard::new().respond_with(|_| Ok(ok(vec![0xFF, 0xD8, 0x00])));

        OffsetScan::new((0x00, 0x00), 3, 5).assemble(&card).unwrap();
        assert_eq!(card.sent().len(), 5);
    }

    #[test]
    fn test_scan_without_start_marker_is_empty() {
        let card = ScriptedCard::new().respond_with(|_| Ok(ok(vec![0x01; 0xFF])));

        assert!(OffsetScan::new((0x00, 0x00), PART_LEN, 40).assemble(&card).is_none());
        assert_eq!(card.sent().len(), 40);
    }

    #[test]
    fn test_scan_tolerates_missing_end_marker() {
        let card = ScriptedCard::new()
            .reply(ok(vec![0xFF, 0xD8, 0x00, 0x01, 0x02]))
            .reply(vec![0x6B, 0x00]);

        let data = OffsetScan::new((0x17, 0x00), 5, 40).assemble(&card).unwrap();
        assert_eq!(data, vec![0xFF, 0xD8, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_probe_finds_block_with_marker() {
        let mut image = vec![0xAB; 8];
        image.extend_from_slice(&[0xFF, 0xD8, 0x00, 0x00, 0xFF, 0xD9]);
        let card = card_with_image(0x1640, image);

        let probe = AutoProbe {
            probe_len: 0x40,
            ..AutoProbe::default()
        };

        assert_eq!(probe.locate(&card), Some((0x16, 0x40)));
    }

    #[test]
    fn test_probe_skips_transmit_errors() {
        let card = ScriptedCard::new()
            .fail(pcsc::Error::CommError)
            .reply(vec![0x6A, 0x82])
            .reply(ok(vec![0x00, 0xFF, 0xD8, 0x00]));

        let probe = AutoProbe::default();
        assert_eq!(probe.locate(&card), Some((0x15, 0x40)));
    }

    #[test]
    fn test_probe_feeds_scan() {
        let mut image = vec![0xFF, 0xD8];
        image.extend_from_slice(&[0x42; 300]);
        image.extend_from_slice(&[0xFF, 0xD9]);
        let expected = image.clone();
        let card = card_with_image(0x1800, image);

        let data = AutoProbe::default().assemble(&card).unwrap();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_chain_first_success_wins() {
        let card = ScriptedCard::new()
            // fixed parts: first part rejected
            .reply(vec![0x6A, 0x82])
            // offset scan
            .reply(ok(vec![0xFF, 0xD8, 0x00, 0x00, 0xFF, 0xD9]));

        let reader = PhotoReader::from_options(&PhotoOptions {
            start_offset: Some((0x17, 0xA9)),
            ..PhotoOptions::default()
        });

        assert_eq!(reader.strategy_names(), vec!["fixed-parts", "offset-scan"]);
        let data = reader.read(&card).unwrap();
        assert_eq!(data, vec![0xFF, 0xD8, 0x00, 0x00, 0xFF, 0xD9]);
        assert_eq!(card.sent().len(), 2);
    }

    #[test]
    fn test_chain_total_failure() {
        let card = ScriptedCard::new()
            .respond_with(|_| Err(CardError::from(pcsc::Error::CommError)));

        let reader = PhotoReader::from_options(&PhotoOptions {
            start_offset: Some((0x17, 0xA9)),
            ..PhotoOptions::default()
        });
        assert!(reader.read(&card).is_none());
    }

    #[test]
    fn test_disabled_chain_is_empty() {
        let reader = PhotoReader::from_options(&PhotoOptions {
            enabled: false,
            probe: Some(AutoProbe::default()),
            ..PhotoOptions::default()
        });
        assert!(reader.strategy_names().is_empty());
    }
}
