//! Transfer protocol codec.
//!
//! Pure encode/decode helpers for the wire format. No I/O.

use thiserror::Error;

/// Action byte requesting an upload (client sends a file).
pub const ACTION_UPLOAD: u8 = b'U';
/// Action byte requesting a download (client receives a file).
pub const ACTION_DOWNLOAD: u8 = b'D';

/// Confirmation status: request accepted / transfer complete.
pub const STATUS_OK: u8 = 0;
/// Confirmation status: request rejected, an error message follows.
pub const STATUS_ERROR: u8 = 1;

/// Width of the file size field.
pub const FILE_SIZE_LEN: usize = 8;

/// Longest filename or error message a 1-byte length prefix can carry.
pub const MAX_SHORT_STRING: usize = u8::MAX as usize;

/// Transfer direction, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    /// Wire byte for this direction.
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Upload => ACTION_UPLOAD,
            Direction::Download => ACTION_DOWNLOAD,
        }
    }
}

/// Wire-level decode/encode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown action byte 0x{0:02x}")]
    UnknownAction(u8),
    #[error("filename length must be between 1 and 255")]
    InvalidFilenameLength,
    #[error("filename too long: {0} bytes")]
    FilenameTooLong(usize),
    #[error("filename is not valid UTF-8")]
    FilenameNotUtf8,
    #[error("file size field needs {FILE_SIZE_LEN} bytes, got {0}")]
    FileSizeLength(usize),
    #[error("error confirmation requires a message")]
    MissingErrorMessage,
    #[error("error message too long: {0} bytes")]
    ErrorMessageTooLong(usize),
    #[error("unknown confirmation status {0}")]
    UnknownStatus(u8),
}

/// Decode the first byte of a new transfer.
pub fn decode_action(byte: u8) -> Result<Direction, CodecError> {
    match byte {
        ACTION_UPLOAD => Ok(Direction::Upload),
        ACTION_DOWNLOAD => Ok(Direction::Download),
        other => Err(CodecError::UnknownAction(other)),
    }
}

/// Encode a filename block: length byte followed by UTF-8 bytes.
pub fn encode_filename(name: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(CodecError::InvalidFilenameLength);
    }
    if bytes.len() > MAX_SHORT_STRING {
        return Err(CodecError::FilenameTooLong(bytes.len()));
    }

    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Decode the filename length byte.
pub fn decode_filename_length(byte: u8) -> Result<u8, CodecError> {
    if byte == 0 {
        Err(CodecError::InvalidFilenameLength)
    } else {
        Ok(byte)
    }
}

/// Decode accumulated filename bytes.
pub fn decode_filename(bytes: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::FilenameNotUtf8)
}

/// Encode a file size as 8 little-endian bytes.
pub fn encode_u64_le(n: u64) -> [u8; FILE_SIZE_LEN] {
    n.to_le_bytes()
}

/// Decode exactly 8 little-endian bytes.
pub fn decode_u64_le(bytes: &[u8]) -> Result<u64, CodecError> {
    let field: [u8; FILE_SIZE_LEN] = bytes
        .try_into()
        .map_err(|_| CodecError::FileSizeLength(bytes.len()))?;
    Ok(u64::from_le_bytes(field))
}

/// Encode a confirmation frame.
///
/// `ok` produces the single byte `0`. A rejection produces `1`, the message
/// length and the UTF-8 message, which must be 1 to 255 bytes long.
pub fn encode_confirmation(ok: bool, error: Option<&str>) -> Result<Vec<u8>, CodecError> {
    if ok {
        return Ok(vec![STATUS_OK]);
    }

    let message = error.unwrap_or_default().as_bytes();
    if message.is_empty() {
        return Err(CodecError::MissingErrorMessage);
    }
    if message.len() > MAX_SHORT_STRING {
        return Err(CodecError::ErrorMessageTooLong(message.len()));
    }

    let mut out = Vec::with_capacity(2 + message.len());
    out.push(STATUS_ERROR);
    out.push(message.len() as u8);
    out.extend_from_slice(message);
    Ok(out)
}

/// Decode a confirmation status byte. Returns `true` for OK.
pub fn decode_status(byte: u8) -> Result<bool, CodecError> {
    match byte {
        STATUS_OK => Ok(true),
        STATUS_ERROR => Ok(false),
        other => Err(CodecError::UnknownStatus(other)),
    }
}
