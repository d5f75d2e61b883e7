//! Per-connection transfer state machine.
//!
//! The machine is fed from a connection's [`ByteCursor`] and advances as far
//! as the available bytes allow. A field cut short by a chunk boundary is
//! simply left half-accumulated; the next call resumes it. The machine does
//! no I/O: it reports [`Step`]s and the caller performs validation,
//! filesystem work and frame emission.
//!
//! ```text
//! AwaitAction -> ReadFilename -> ReadFileSize (upload only)
//!             -> AwaitConfirmation -> StreamPayload -> Done
//! ```

use super::codec::{self, CodecError, Direction, FILE_SIZE_LEN};
use crate::runtime::ByteCursor;
use bytes::Bytes;

/// Where a connection is in its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transfer; the next byte selects the direction.
    AwaitAction,
    /// Reading the length-prefixed filename.
    ReadFilename,
    /// Reading the 8-byte upload size.
    ReadFileSize,
    /// Header complete, waiting for the caller to accept or reject.
    AwaitConfirmation,
    /// Moving file bytes.
    StreamPayload,
    /// Transfer finished or rejected; call [`TransferMachine::finish`].
    Done,
}

/// A fully parsed transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub direction: Direction,
    pub filename: String,
    /// Declared upload size. `None` for downloads.
    pub file_size: Option<u64>,
}

/// Something the caller must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The header is complete. Validate, then `accept` or `reject`.
    Request(Request),
    /// Upload bytes, in arrival order, to append to the file.
    Payload(Bytes),
    /// All declared upload bytes have been delivered.
    Complete,
}

/// State of one upload or download bound to a connection.
#[derive(Debug)]
pub struct Transfer {
    direction: Direction,
    phase: Phase,
    /// Declared filename length; 0 until the length byte has been read.
    filename_length: u8,
    filename: Vec<u8>,
    size_field: Vec<u8>,
    confirmed: bool,
    file_size: u64,
    file_position: u64,
}

impl Transfer {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            phase: Phase::ReadFilename,
            filename_length: 0,
            filename: Vec::new(),
            size_field: Vec::with_capacity(FILE_SIZE_LEN),
            confirmed: false,
            file_size: 0,
            file_position: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Filename bytes received so far, lossily decoded.
    pub fn filename(&self) -> String {
        String::from_utf8_lossy(&self.filename).into_owned()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_position(&self) -> u64 {
        self.file_position
    }

    fn request(&self) -> Result<Request, CodecError> {
        Ok(Request {
            direction: self.direction,
            filename: codec::decode_filename(&self.filename)?,
            file_size: match self.direction {
                Direction::Upload => Some(self.file_size),
                Direction::Download => None,
            },
        })
    }
}

/// Drives at most one [`Transfer`] at a time for a single connection.
#[derive(Debug, Default)]
pub struct TransferMachine {
    transfer: Option<Transfer>,
}

impl TransferMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.transfer
            .as_ref()
            .map_or(Phase::AwaitAction, |t| t.phase)
    }

    /// The active transfer, if any.
    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    /// Consume as many bytes from `input` as the current phase can use and
    /// return the next step, or `None` if more bytes are needed.
    ///
    /// Call repeatedly until it returns `Ok(None)`. Bytes the machine cannot
    /// use yet stay in `input`.
    pub fn advance(&mut self, input: &mut ByteCursor) -> Result<Option<Step>, CodecError> {
        loop {
            let Some(transfer) = self.transfer.as_mut() else {
                let Some(byte) = input.take_u8() else {
                    return Ok(None);
                };
                let direction = codec::decode_action(byte)?;
                self.transfer = Some(Transfer::new(direction));
                continue;
            };

            match transfer.phase {
                Phase::AwaitAction => unreachable!("an active transfer has a direction"),
                Phase::ReadFilename => {
                    if transfer.filename_length == 0 {
                        let Some(byte) = input.take_u8() else {
                            return Ok(None);
                        };
                        transfer.filename_length = codec::decode_filename_length(byte)?;
                    }

                    let wanted = transfer.filename_length as usize;
                    let missing = wanted - transfer.filename.len();
                    transfer.filename.extend_from_slice(&input.take(missing));
                    if transfer.filename.len() < wanted {
                        return Ok(None);
                    }

                    match transfer.direction {
                        Direction::Upload => transfer.phase = Phase::ReadFileSize,
                        Direction::Download => {
                            transfer.phase = Phase::AwaitConfirmation;
                            return transfer.request().map(|r| Some(Step::Request(r)));
                        }
                    }
                }
                Phase::ReadFileSize => {
                    let missing = FILE_SIZE_LEN - transfer.size_field.len();
                    transfer.size_field.extend_from_slice(&input.take(missing));
                    if transfer.size_field.len() < FILE_SIZE_LEN {
                        return Ok(None);
                    }

                    transfer.file_size = codec::decode_u64_le(&transfer.size_field)?;
                    transfer.phase = Phase::AwaitConfirmation;
                    return transfer.request().map(|r| Some(Step::Request(r)));
                }
                Phase::AwaitConfirmation | Phase::Done => return Ok(None),
                Phase::StreamPayload => {
                    // Downloads are driven by the server, not by incoming bytes
                    if transfer.direction == Direction::Download {
                        return Ok(None);
                    }

                    let remaining = transfer.file_size - transfer.file_position;
                    if remaining == 0 {
                        transfer.phase = Phase::Done;
                        return Ok(Some(Step::Complete));
                    }
                    if input.is_empty() {
                        return Ok(None);
                    }

                    let chunk = input.take(usize::try_from(remaining).unwrap_or(usize::MAX));
                    transfer.file_position += chunk.len() as u64;
                    return Ok(Some(Step::Payload(chunk)));
                }
            }
        }
    }

    /// Accept the pending request and start streaming.
    ///
    /// For downloads, `download_size` is the size of the file about to be
    /// sent; it is ignored for uploads.
    ///
    /// Returns `false` if no request is waiting for confirmation.
    pub fn accept(&mut self, download_size: u64) -> bool {
        match self.transfer.as_mut() {
            Some(transfer) if transfer.phase == Phase::AwaitConfirmation => {
                if transfer.direction == Direction::Download {
                    transfer.file_size = download_size;
                }
                transfer.confirmed = true;
                transfer.phase = Phase::StreamPayload;
                true
            }
            _ => false,
        }
    }

    /// Reject the pending request. The transfer goes straight to `Done`.
    pub fn reject(&mut self) {
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.phase = Phase::Done;
        }
    }

    /// Record `n` download bytes as sent. Returns `true` once the whole file
    /// has gone out.
    pub fn record_sent(&mut self, n: u64) -> bool {
        let Some(transfer) = self.transfer.as_mut() else {
            return false;
        };
        if transfer.direction != Direction::Download || transfer.phase != Phase::StreamPayload {
            return false;
        }

        transfer.file_position = (transfer.file_position + n).min(transfer.file_size);
        if transfer.file_position == transfer.file_size {
            transfer.phase = Phase::Done;
            true
        } else {
            false
        }
    }

    /// Destroy the current transfer, returning the machine to `AwaitAction`.
    pub fn finish(&mut self) -> Option<Transfer> {
        self.transfer.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::transfer::codec::{encode_filename, encode_u64_le};

    fn upload_bytes(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut input = vec![b'U'];
        input.extend(encode_filename(name).unwrap());
        input.extend(encode_u64_le(payload.len() as u64));
        input.extend_from_slice(payload);
        input
    }

    /// Feed `input` in `chunk`-sized pieces, accepting every request.
    /// Returns the requests seen, the payload and whether it completed.
    fn drive(input: &[u8], chunk: usize) -> (Vec<Request>, Vec<u8>, bool) {
        let mut machine = TransferMachine::new();
        let mut cursor = ByteCursor::new();
        let mut requests = Vec::new();
        let mut payload = Vec::new();
        let mut complete = false;

        for piece in input.chunks(chunk) {
            cursor.extend(piece);
            while let Some(step) = machine.advance(&mut cursor).unwrap() {
                match step {
                    Step::Request(req) => {
                        requests.push(req);
                        assert!(machine.accept(0));
                    }
                    Step::Payload(bytes) => payload.extend_from_slice(&bytes),
                    Step::Complete => {
                        complete = true;
                        machine.finish();
                    }
                }
            }
        }

        (requests, payload, complete)
    }

    #[test]
    fn test_upload_in_one_chunk() {
        let input = upload_bytes("a.txt", b"hello world!");
        let (requests, payload, complete) = drive(&input, input.len());

        assert_eq!(
            requests,
            vec![Request {
                direction: Direction::Upload,
                filename: "a.txt".to_string(),
                file_size: Some(12),
            }]
        );
        assert_eq!(payload, b"hello world!");
        assert!(complete);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_outcome() {
        let input = upload_bytes("some/longer-name.bin", &[0xAB; 100]);
        let expected = drive(&input, input.len());

        for chunk in [1, 2, 3, 7, 8, 9, 64] {
            assert_eq!(drive(&input, chunk), expected, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_download_request() {
        let mut cursor = ByteCursor::from(&b"D\x05b.bin"[..]);
        let mut machine = TransferMachine::new();

        let step = machine.advance(&mut cursor).unwrap();
        assert_eq!(
            step,
            Some(Step::Request(Request {
                direction: Direction::Download,
                filename: "b.bin".to_string(),
                file_size: None,
            }))
        );
        assert_eq!(machine.phase(), Phase::AwaitConfirmation);

        assert!(machine.accept(3));
        assert_eq!(machine.transfer().unwrap().file_size(), 3);
        assert_eq!(machine.advance(&mut cursor).unwrap(), None);
        assert!(!machine.record_sent(2));
        assert!(machine.record_sent(1));
        assert_eq!(machine.phase(), Phase::Done);

        machine.finish();
        assert_eq!(machine.phase(), Phase::AwaitAction);
    }

    #[test]
    fn test_partial_filename_waits() {
        let mut cursor = ByteCursor::from(&b"D\x05ab"[..]);
        let mut machine = TransferMachine::new();

        assert_eq!(machine.advance(&mut cursor).unwrap(), None);
        assert_eq!(machine.phase(), Phase::ReadFilename);
        assert!(cursor.is_empty());
        assert_eq!(machine.transfer().unwrap().filename(), "ab");

        cursor.extend(b"c.d");
        assert!(matches!(
            machine.advance(&mut cursor).unwrap(),
            Some(Step::Request(Request { ref filename, .. })) if filename == "abc.d"
        ));
    }

    #[test]
    fn test_unknown_action() {
        let mut cursor = ByteCursor::from(&b"X\x01a"[..]);
        let mut machine = TransferMachine::new();

        assert_eq!(
            machine.advance(&mut cursor),
            Err(CodecError::UnknownAction(b'X'))
        );
        assert!(machine.transfer().is_none());
    }

    #[test]
    fn test_zero_filename_length_rejected_before_more_bytes() {
        let mut cursor = ByteCursor::from(&b"U\x00abc"[..]);
        let mut machine = TransferMachine::new();

        assert_eq!(
            machine.advance(&mut cursor),
            Err(CodecError::InvalidFilenameLength)
        );
        // Nothing past the length byte was consumed
        assert_eq!(cursor.as_slice(), b"abc");
    }

    #[test]
    fn test_max_filename_length() {
        let name = "n".repeat(255);
        let mut input = vec![b'D'];
        input.extend(encode_filename(&name).unwrap());

        let mut cursor = ByteCursor::from(&input[..]);
        let mut machine = TransferMachine::new();
        match machine.advance(&mut cursor).unwrap() {
            Some(Step::Request(req)) => assert_eq!(req.filename, name),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_filename() {
        let mut cursor = ByteCursor::from(&b"D\x02\xff\xfe"[..]);
        let mut machine = TransferMachine::new();
        assert_eq!(machine.advance(&mut cursor), Err(CodecError::FilenameNotUtf8));
    }

    #[test]
    fn test_payload_stops_at_declared_size() {
        let mut input = upload_bytes("a", b"abc");
        input.extend_from_slice(b"D\x01a");

        let mut cursor = ByteCursor::from(&input[..]);
        let mut machine = TransferMachine::new();

        assert!(matches!(machine.advance(&mut cursor).unwrap(), Some(Step::Request(_))));
        assert!(machine.accept(0));
        assert_eq!(
            machine.advance(&mut cursor).unwrap(),
            Some(Step::Payload(Bytes::from_static(b"abc")))
        );
        assert_eq!(machine.transfer().unwrap().file_position(), 3);
        assert_eq!(machine.advance(&mut cursor).unwrap(), Some(Step::Complete));
        machine.finish();

        // Bytes after the payload begin the next transfer
        assert_eq!(cursor.as_slice(), b"D\x01a");
        assert!(matches!(
            machine.advance(&mut cursor).unwrap(),
            Some(Step::Request(Request { direction: Direction::Download, .. }))
        ));
    }

    #[test]
    fn test_no_progress_while_awaiting_confirmation() {
        let input = upload_bytes("a", b"xyz");
        let mut cursor = ByteCursor::from(&input[..]);
        let mut machine = TransferMachine::new();

        assert!(matches!(machine.advance(&mut cursor).unwrap(), Some(Step::Request(_))));
        assert_eq!(machine.advance(&mut cursor).unwrap(), None);
        assert_eq!(cursor.len(), 3);
        assert!(!machine.transfer().unwrap().is_confirmed());
    }

    #[test]
    fn test_reject() {
        let mut cursor = ByteCursor::from(&upload_bytes("a", b"")[..]);
        let mut machine = TransferMachine::new();

        match machine.advance(&mut cursor).unwrap() {
            Some(Step::Request(req)) => assert_eq!(req.file_size, Some(0)),
            other => panic!("unexpected: {:?}", other),
        }
        machine.reject();
        assert_eq!(machine.phase(), Phase::Done);
        assert!(!machine.accept(0));
    }
}
