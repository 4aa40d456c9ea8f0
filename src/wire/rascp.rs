//! RAS Control Point command and response frames.

use super::FrameError;

/// RAS-CP command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Get Ranging Data.
    GetRangingData = 0x00,
    /// ACK Ranging Data.
    AckRangingData = 0x01,
    /// Retrieve Lost Ranging Data Segments (not supported).
    RetrieveLostSegments = 0x02,
    /// Abort Operation (not supported).
    AbortOperation = 0x03,
    /// Set Filter (not supported).
    SetFilter = 0x04,
}

impl CommandOpcode {
    /// Parse a command opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::GetRangingData),
            0x01 => Some(Self::AckRangingData),
            0x02 => Some(Self::RetrieveLostSegments),
            0x03 => Some(Self::AbortOperation),
            0x04 => Some(Self::SetFilter),
            _ => None,
        }
    }

    /// Opcode byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// RAS-CP response opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseOpcode {
    /// Complete Ranging Data response.
    CompleteRangingData = 0x00,
    /// Complete Lost Ranging Data Segments response (not supported).
    CompleteLostSegments = 0x01,
    /// Response Code.
    ResponseCode = 0x02,
}

impl ResponseOpcode {
    /// Parse a response opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::CompleteRangingData),
            0x01 => Some(Self::CompleteLostSegments),
            0x02 => Some(Self::ResponseCode),
            _ => None,
        }
    }

    /// Opcode byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// RAS-CP response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseCode {
    /// Operation completed.
    Success = 0x01,
    /// Opcode not supported by the server.
    OpcodeNotSupported = 0x02,
    /// Command parameter invalid.
    InvalidParameter = 0x03,
    /// Operation completed and persisted.
    SuccessPersisted = 0x04,
    /// Abort was requested but could not be honored.
    AbortUnsuccessful = 0x05,
    /// Requested procedure is not yet complete.
    ProcedureNotCompleted = 0x06,
    /// Server is busy with another transfer.
    ServerBusy = 0x07,
    /// No record matches the requested ranging counter.
    NoRecordsFound = 0x08,
}

impl ResponseCode {
    /// Parse a response code byte. Zero is reserved.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Success),
            0x02 => Some(Self::OpcodeNotSupported),
            0x03 => Some(Self::InvalidParameter),
            0x04 => Some(Self::SuccessPersisted),
            0x05 => Some(Self::AbortUnsuccessful),
            0x06 => Some(Self::ProcedureNotCompleted),
            0x07 => Some(Self::ServerBusy),
            0x08 => Some(Self::NoRecordsFound),
            _ => None,
        }
    }

    /// Response code byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded RAS-CP command.
///
/// Wire format: 1 opcode byte followed by up to 4 parameter bytes.
/// `GET_RD`/`ACK_RD` carry a 16-bit ranging counter (LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasCpCommand {
    /// Request transfer of the record with the given counter.
    GetRangingData {
        /// Ranging counter of the requested record.
        ranging_counter: u16,
    },
    /// Acknowledge complete reception of the record.
    AckRangingData {
        /// Ranging counter of the acknowledged record.
        ranging_counter: u16,
    },
}

impl RasCpCommand {
    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::GetRangingData { ranging_counter } => {
                let mut buf = vec![CommandOpcode::GetRangingData.as_byte()];
                buf.extend_from_slice(&ranging_counter.to_le_bytes());
                buf
            }
            Self::AckRangingData { ranging_counter } => {
                let mut buf = vec![CommandOpcode::AckRangingData.as_byte()];
                buf.extend_from_slice(&ranging_counter.to_le_bytes());
                buf
            }
        }
    }

    /// Decode a control point write.
    ///
    /// Opcodes the implementation does not support decode to
    /// [`FrameError::UnsupportedOpcode`] so the server can answer with the
    /// matching response code.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let opcode_byte = *data.first().ok_or(FrameError::TooShort {
            expected: 1,
            actual: 0,
        })?;

        let opcode =
            CommandOpcode::from_byte(opcode_byte).ok_or(FrameError::UnsupportedOpcode(opcode_byte))?;

        match opcode {
            CommandOpcode::GetRangingData | CommandOpcode::AckRangingData => {
                if data.len() < 3 {
                    return Err(FrameError::TooShort {
                        expected: 3,
                        actual: data.len(),
                    });
                }
                let ranging_counter = u16::from_le_bytes([data[1], data[2]]);
                Ok(match opcode {
                    CommandOpcode::GetRangingData => Self::GetRangingData { ranging_counter },
                    _ => Self::AckRangingData { ranging_counter },
                })
            }
            CommandOpcode::RetrieveLostSegments
            | CommandOpcode::AbortOperation
            | CommandOpcode::SetFilter => Err(FrameError::UnsupportedOpcode(opcode_byte)),
        }
    }
}

/// A decoded RAS-CP response indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasCpResponse {
    /// All segments of a record have been sent.
    CompleteRangingData {
        /// Ranging counter of the completed record.
        ranging_counter: u16,
    },
    /// Lost segment retransmission complete (not supported, decoded only).
    CompleteLostSegments {
        /// First retransmitted segment.
        start_segment: u8,
        /// Last retransmitted segment.
        end_segment: u8,
    },
    /// Status response to a command.
    ResponseCode(ResponseCode),
}

impl RasCpResponse {
    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::CompleteRangingData { ranging_counter } => {
                let mut buf = vec![ResponseOpcode::CompleteRangingData.as_byte()];
                buf.extend_from_slice(&ranging_counter.to_le_bytes());
                buf
            }
            Self::CompleteLostSegments {
                start_segment,
                end_segment,
            } => vec![
                ResponseOpcode::CompleteLostSegments.as_byte(),
                start_segment,
                end_segment,
            ],
            Self::ResponseCode(code) => {
                vec![ResponseOpcode::ResponseCode.as_byte(), code.as_byte()]
            }
        }
    }

    /// Decode a control point indication.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let opcode_byte = *data.first().ok_or(FrameError::TooShort {
            expected: 1,
            actual: 0,
        })?;

        let opcode = ResponseOpcode::from_byte(opcode_byte)
            .ok_or(FrameError::UnsupportedOpcode(opcode_byte))?;
        let params = &data[1..];

        match opcode {
            ResponseOpcode::CompleteRangingData => {
                if params.len() < 2 {
                    return Err(FrameError::TooShort {
                        expected: 3,
                        actual: data.len(),
                    });
                }
                Ok(Self::CompleteRangingData {
                    ranging_counter: u16::from_le_bytes([params[0], params[1]]),
                })
            }
            ResponseOpcode::CompleteLostSegments => {
                if params.len() < 2 {
                    return Err(FrameError::TooShort {
                        expected: 3,
                        actual: data.len(),
                    });
                }
                Ok(Self::CompleteLostSegments {
                    start_segment: params[0],
                    end_segment: params[1],
                })
            }
            ResponseOpcode::ResponseCode => {
                let code_byte = *params.first().ok_or(FrameError::TooShort {
                    expected: 2,
                    actual: data.len(),
                })?;
                let code = ResponseCode::from_byte(code_byte)
                    .ok_or(FrameError::InvalidValue("reserved response code"))?;
                Ok(Self::ResponseCode(code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        for cmd in [
            RasCpCommand::GetRangingData {
                ranging_counter: 0x0102,
            },
            RasCpCommand::AckRangingData {
                ranging_counter: 0x0FFF,
            },
        ] {
            assert_eq!(RasCpCommand::decode(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_command_wire_bytes() {
        let cmd = RasCpCommand::GetRangingData {
            ranging_counter: 0x1234,
        };
        assert_eq!(hex::encode(cmd.encode()), "003412");
    }

    #[test]
    fn test_command_unsupported_opcodes() {
        for opcode in [0x02u8, 0x03, 0x04, 0x7F] {
            assert!(matches!(
                RasCpCommand::decode(&[opcode, 0, 0]),
                Err(FrameError::UnsupportedOpcode(b)) if b == opcode
            ));
        }
    }

    #[test]
    fn test_command_truncated_params() {
        assert!(matches!(
            RasCpCommand::decode(&[0x00, 0x01]),
            Err(FrameError::TooShort { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_command_empty() {
        assert!(matches!(
            RasCpCommand::decode(&[]),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        for rsp in [
            RasCpResponse::CompleteRangingData {
                ranging_counter: 42,
            },
            RasCpResponse::CompleteLostSegments {
                start_segment: 3,
                end_segment: 9,
            },
            RasCpResponse::ResponseCode(ResponseCode::ServerBusy),
        ] {
            assert_eq!(RasCpResponse::decode(&rsp.encode()).unwrap(), rsp);
        }
    }

    #[test]
    fn test_response_code_bytes() {
        let rsp = RasCpResponse::ResponseCode(ResponseCode::NoRecordsFound);
        assert_eq!(rsp.encode(), vec![0x02, 0x08]);
    }

    #[test]
    fn test_response_reserved_code() {
        assert!(matches!(
            RasCpResponse::decode(&[0x02, 0x00]),
            Err(FrameError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_response_code_from_byte_full_range() {
        assert_eq!(ResponseCode::from_byte(0x00), None);
        assert_eq!(ResponseCode::from_byte(0x01), Some(ResponseCode::Success));
        assert_eq!(
            ResponseCode::from_byte(0x08),
            Some(ResponseCode::NoRecordsFound)
        );
        assert_eq!(ResponseCode::from_byte(0x09), None);
    }
}
