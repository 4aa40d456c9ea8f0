//! Step-data walk over a reassembled ranging data record.
//!
//! A stored record is not self-describing: each step's data length
//! depends on its CS mode and on the role the local device played in the
//! procedure. The walk therefore asks the caller for every step's length,
//! with [`StepLengthTable`] as the usual carrier for that configuration.

use thiserror::Error;

use crate::core::constants::{RANGING_HEADER_LEN, SUBEVENT_HEADER_LEN};
use crate::wire::{FrameError, RangingHeader, SubeventHeader};

/// Errors from walking a ranging data record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A header failed to decode.
    #[error("header error: {0}")]
    Header(#[from] FrameError),

    /// The record ended before the declared subevents/steps.
    #[error("ranging data truncated at byte {at}")]
    Truncated {
        /// Offset at which data ran out.
        at: usize,
    },
}

/// Caller-supplied CS mode to step-data length mapping.
///
/// The mapping depends on the local device's role and the controller's
/// reporting format; it is configuration, never inferred from the data.
/// `None` marks a mode the caller cannot size, which stops the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLengthTable {
    lengths: [Option<usize>; 4],
}

impl StepLengthTable {
    /// Build a table from per-mode lengths (modes 0-3).
    pub fn new(lengths: [Option<usize>; 4]) -> Self {
        Self { lengths }
    }

    /// Data length for `mode`, if known.
    pub fn len_for(&self, mode: u8) -> Option<usize> {
        self.lengths.get(usize::from(mode)).copied().flatten()
    }
}

/// Walk a reassembled ranging data record.
///
/// For each subevent, `on_subevent` receives the decoded header and
/// returns whether to continue. For each step, `on_step` receives the
/// step mode and the remaining record bytes and returns the length of
/// that step's data (see [`StepLengthTable`]); returning `None` ends the
/// walk. A subevent reporting zero steps ends the walk - a malformed
/// record must not loop forever.
///
/// The walk is read-only and restartable: invoking it again on the same
/// bytes repeats it from the start.
pub fn parse_ranging_data<S, T>(
    data: &[u8],
    mut on_subevent: S,
    mut on_step: T,
) -> Result<RangingHeader, ParseError>
where
    S: FnMut(&SubeventHeader) -> bool,
    T: FnMut(u8, &[u8]) -> Option<usize>,
{
    let ranging_header = RangingHeader::from_bytes(data)?;
    let mut at = RANGING_HEADER_LEN;

    while at < data.len() {
        if data.len() - at < SUBEVENT_HEADER_LEN {
            return Err(ParseError::Truncated { at });
        }
        let header = SubeventHeader::from_bytes(&data[at..])?;
        at += SUBEVENT_HEADER_LEN;

        if !on_subevent(&header) {
            break;
        }

        let num_steps = usize::from(header.num_steps_reported);
        if num_steps == 0 {
            break;
        }

        if data.len() - at < num_steps {
            return Err(ParseError::Truncated { at });
        }
        let modes_at = at;
        at += num_steps;

        for step in 0..num_steps {
            let mode = data[modes_at + step];
            let Some(len) = on_step(mode, &data[at..]) else {
                return Ok(ranging_header);
            };
            if data.len() - at < len {
                return Err(ParseError::Truncated { at });
            }
            at += len;
        }
    }

    Ok(ranging_header)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Record with two subevents of two mode-1 steps each (3 data bytes per step).
    fn sample_record() -> Vec<u8> {
        let mut data = RangingHeader {
            ranging_counter: 9,
            config_id: 2,
            selected_tx_power: 0,
            antenna_paths_mask: 1,
        }
        .to_bytes()
        .to_vec();

        for subevent in 0..2u16 {
            data.extend_from_slice(
                &SubeventHeader {
                    start_acl_conn_event: subevent,
                    freq_compensation: 0,
                    ranging_done_status: 0,
                    subevent_done_status: 0,
                    ranging_abort_reason: 0,
                    subevent_abort_reason: 0,
                    ref_power_level: -40,
                    num_steps_reported: 2,
                }
                .to_bytes(),
            );
            data.extend_from_slice(&[1, 1]); // step modes
            data.extend_from_slice(&[0xA0, 0xA1, 0xA2, 0xB0, 0xB1, 0xB2]);
        }

        data
    }

    #[test]
    fn test_walks_all_subevents_and_steps() {
        let data = sample_record();
        let table = StepLengthTable::new([Some(0), Some(3), None, None]);
        let mut subevents = 0;
        let mut steps = Vec::new();

        let header = parse_ranging_data(
            &data,
            |hdr| {
                subevents += 1;
                assert_eq!(hdr.num_steps_reported, 2);
                true
            },
            |mode, rest| {
                steps.push((mode, rest[0]));
                table.len_for(mode)
            },
        )
        .unwrap();

        assert_eq!(header.ranging_counter, 9);
        assert_eq!(subevents, 2);
        assert_eq!(steps, vec![(1, 0xA0), (1, 0xB0), (1, 0xA0), (1, 0xB0)]);
    }

    #[test]
    fn test_subevent_callback_stops_walk() {
        let data = sample_record();
        let mut subevents = 0;

        parse_ranging_data(
            &data,
            |_| {
                subevents += 1;
                false
            },
            |_, _| panic!("no steps expected after stop"),
        )
        .unwrap();

        assert_eq!(subevents, 1);
    }

    #[test]
    fn test_step_callback_stops_walk() {
        let data = sample_record();
        let mut steps = 0;

        parse_ranging_data(
            &data,
            |_| true,
            |_, _| {
                steps += 1;
                None
            },
        )
        .unwrap();

        assert_eq!(steps, 1);
    }

    #[test]
    fn test_zero_steps_ends_walk() {
        let mut data = RangingHeader {
            ranging_counter: 1,
            config_id: 0,
            selected_tx_power: 0,
            antenna_paths_mask: 0,
        }
        .to_bytes()
        .to_vec();
        data.extend_from_slice(
            &SubeventHeader {
                start_acl_conn_event: 0,
                freq_compensation: 0,
                ranging_done_status: 0,
                subevent_done_status: 0,
                ranging_abort_reason: 0,
                subevent_abort_reason: 0,
                ref_power_level: 0,
                num_steps_reported: 0,
            }
            .to_bytes(),
        );
        // Trailing garbage that must never be interpreted.
        data.extend_from_slice(&[0xFF; 16]);

        let mut subevents = 0;
        parse_ranging_data(
            &data,
            |_| {
                subevents += 1;
                true
            },
            |_, _| Some(1),
        )
        .unwrap();
        assert_eq!(subevents, 1);
    }

    #[test]
    fn test_truncated_step_data() {
        let mut data = sample_record();
        data.truncate(data.len() - 2);

        let result = parse_ranging_data(&data, |_| true, |_, _| Some(3));
        assert!(matches!(result, Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_subevent_header() {
        let data = sample_record();
        let result = parse_ranging_data(&data[..RANGING_HEADER_LEN + 3], |_| true, |_, _| Some(3));
        assert!(matches!(result, Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn test_restartable() {
        let data = sample_record();
        let count = |data: &[u8]| {
            let mut steps = 0;
            parse_ranging_data(data, |_| true, |_, _| {
                steps += 1;
                Some(3)
            })
            .unwrap();
            steps
        };

        assert_eq!(count(&data), 4);
        assert_eq!(count(&data), 4);
    }

    #[test]
    fn test_length_table_unknown_mode() {
        let table = StepLengthTable::new([Some(5), None, Some(8), None]);
        assert_eq!(table.len_for(0), Some(5));
        assert_eq!(table.len_for(1), None);
        assert_eq!(table.len_for(2), Some(8));
        assert_eq!(table.len_for(9), None);
    }
}
