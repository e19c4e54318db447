//! Serial command channel: line format and response codes.
//!
//! The transport is a fixed-baud 8-N-1 UART owned by the integration;
//! this module only fixes the byte-exact protocol. The receiver is
//! expected to apply a per-character timeout of at least 10 ms and a
//! whole-command timeout of at least 60 s, answering [`Response::Ng`] to
//! anything malformed.

use crate::ErrorKind;

/// Banner emitted once after power-on.
pub const READY: &str = "READY\r\n";

/// Longest accepted path, in bytes.
pub const MAX_PATH: usize = 127;

/// Every byte sequence the programmer ever sends back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Ng,
    SdMount,
    FileNotFound,
    HexParse,
    TargetConnect,
    ProgramFail,
    VerifyFail,
}

impl Response {
    /// The exact bytes sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Response::Ok => "OK\r\n",
            Response::Ng => "NG\r\n",
            Response::SdMount => "ERR_SD_MOUNT\r\n",
            Response::FileNotFound => "ERR_FILE_NOT_FOUND\r\n",
            Response::HexParse => "ERR_HEX_PARSE\r\n",
            Response::TargetConnect => "ERR_TARGET_CONNECT\r\n",
            Response::ProgramFail => "ERR_PROGRAM_FAIL\r\n",
            Response::VerifyFail => "ERR_VERIFY_FAIL\r\n",
        }
    }
}

impl From<ErrorKind> for Response {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::SdMount => Response::SdMount,
            ErrorKind::FileNotFound => Response::FileNotFound,
            ErrorKind::HexParse => Response::HexParse,
            ErrorKind::TargetConnect => Response::TargetConnect,
            ErrorKind::ProgramFail => Response::ProgramFail,
            ErrorKind::VerifyFail => Response::VerifyFail,
            ErrorKind::Generic => Response::Ng,
        }
    }
}

/// Parses one received command line (terminator already stripped).
///
/// The only command is `FILE: <path>`. Returns the path, or `None` for
/// anything malformed: wrong verb, empty or overlong path, or stray
/// CR/LF bytes smuggled into the line.
pub fn parse_command(line: &[u8]) -> Option<&[u8]> {
    let path = line.strip_prefix(&b"FILE: "[..])?;
    if path.is_empty() || path.len() > MAX_PATH {
        return None;
    }
    if path.iter().any(|&b| b == b'\r' || b == b'\n') {
        return None;
    }
    Some(path)
}
