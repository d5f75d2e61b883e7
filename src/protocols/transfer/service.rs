//! File transfer service.
//!
//! Binds one [`TransferMachine`] to each connection, resolves filenames
//! against the data root, and performs the file reads and writes each step
//! calls for.

use super::codec::{self, CodecError, Direction};
use super::machine::{Request, Step, TransferMachine};
use super::TransferError;
use crate::runtime::{ByteCursor, ConnectionId, Handler, Peer};
use crate::storage::{DataRoot, StoreError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

const INVALID_FILENAME: &str = "Invalid filename!";
const INVALID_FILE_SIZE: &str = "Invalid file size!";
const FILE_NOT_FOUND: &str = "File not found!";

/// A file held open by a transfer. Dropping it closes the handle.
struct OpenFile {
    path: PathBuf,
    handle: File,
}

/// Per-connection state.
struct Session {
    addr: SocketAddr,
    cursor: ByteCursor,
    machine: TransferMachine,
    file: Option<OpenFile>,
}

impl Session {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            cursor: ByteCursor::new(),
            machine: TransferMachine::new(),
            file: None,
        }
    }
}

/// Serves uploads into and downloads out of a [`DataRoot`].
pub struct FileTransferService {
    root: DataRoot,
    chunk_size: usize,
    sessions: HashMap<ConnectionId, Session>,
}

impl FileTransferService {
    /// `chunk_size` is the read size used when streaming downloads.
    pub fn new(root: DataRoot, chunk_size: usize) -> Self {
        Self {
            root,
            chunk_size: chunk_size.max(1),
            sessions: HashMap::new(),
        }
    }

    /// Number of connections with transfer state.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a connection currently holds an open file.
    pub fn has_open_file(&self, conn_id: ConnectionId) -> bool {
        self.sessions
            .get(&conn_id)
            .is_some_and(|s| s.file.is_some())
    }

    /// Whether a connection is in the middle of a transfer.
    pub fn has_transfer(&self, conn_id: ConnectionId) -> bool {
        self.sessions
            .get(&conn_id)
            .is_some_and(|s| s.machine.transfer().is_some())
    }

    fn process(&mut self, peer: &mut dyn Peer, session: &mut Session) -> Result<(), TransferError> {
        loop {
            let step = match session.machine.advance(&mut session.cursor) {
                Ok(Some(step)) => step,
                Ok(None) => return Ok(()),
                Err(e) => {
                    // An unrecognized action gets no reply at all
                    if !matches!(e, CodecError::UnknownAction(_)) {
                        let _ = send_confirmation(peer, Err(INVALID_FILENAME));
                    }
                    return Err(e.into());
                }
            };

            match step {
                Step::Request(request) => self.handle_request(peer, session, request)?,
                Step::Payload(bytes) => {
                    if session.file.is_none() {
                        session.file = Some(self.create_upload(&session.machine)?);
                    }
                    if let Some(file) = session.file.as_mut() {
                        file.handle
                            .write_all(&bytes)
                            .map_err(|source| StoreError::Io {
                                path: file.path.clone(),
                                source,
                            })?;
                    }
                }
                Step::Complete => {
                    let transfer = session.machine.finish();
                    // Close before confirming so the file is complete on disk
                    let file = session.file.take();
                    drop(file);

                    send_confirmation(peer, Ok(())).map_err(TransferError::Transport)?;
                    if let Some(transfer) = transfer {
                        info!(
                            conn_id = peer.id(),
                            filename = %transfer.filename(),
                            size = transfer.file_size(),
                            "File received"
                        );
                    }
                }
            }
        }
    }

    fn handle_request(
        &mut self,
        peer: &mut dyn Peer,
        session: &mut Session,
        request: Request,
    ) -> Result<(), TransferError> {
        let conn_id = peer.id();
        info!(
            conn_id,
            direction = ?request.direction,
            filename = %request.filename,
            size = ?request.file_size,
            "Transfer requested"
        );

        if let Err(reason) = self.validate(&request) {
            session.machine.reject();
            send_confirmation(peer, Err(reason)).map_err(TransferError::Transport)?;
            return Err(TransferError::Rejected(reason));
        }

        match request.direction {
            Direction::Upload => {
                session.machine.accept(0);
                send_confirmation(peer, Ok(())).map_err(TransferError::Transport)?;
                debug!(conn_id, size = ?request.file_size, "Receiving file");
                Ok(())
            }
            Direction::Download => self.send_file(peer, session, &request.filename),
        }
    }

    /// Direction-specific preconditions. The error is the message sent to
    /// the client.
    fn validate(&self, request: &Request) -> Result<(), &'static str> {
        let checked = match request.direction {
            Direction::Upload => {
                if request.file_size.unwrap_or(0) == 0 {
                    return Err(INVALID_FILE_SIZE);
                }
                self.root.resolve(&request.filename).map(|_| ())
            }
            Direction::Download => self.root.stat(&request.filename).map(|_| ()),
        };

        match checked {
            Ok(()) => Ok(()),
            Err(StoreError::InvalidName(_)) => Err(INVALID_FILENAME),
            Err(StoreError::NotFound(_)) => Err(FILE_NOT_FOUND),
            Err(e) => {
                warn!(filename = %request.filename, error = %e, "Cannot stat file");
                Err(FILE_NOT_FOUND)
            }
        }
    }

    fn create_upload(&self, machine: &TransferMachine) -> Result<OpenFile, StoreError> {
        let filename = machine
            .transfer()
            .map(|t| t.filename())
            .unwrap_or_default();
        let path = self.root.resolve(&filename)?;
        let handle = self.root.create(&filename)?;
        Ok(OpenFile { path, handle })
    }

    /// Confirm a download and stream the whole file to the peer.
    fn send_file(
        &mut self,
        peer: &mut dyn Peer,
        session: &mut Session,
        filename: &str,
    ) -> Result<(), TransferError> {
        send_confirmation(peer, Ok(())).map_err(TransferError::Transport)?;

        let path = self.root.resolve(filename)?;
        let (handle, size) = self.root.open_read(filename)?;
        session.machine.accept(size);
        let file = session.file.insert(OpenFile { path, handle });

        peer.send(&codec::encode_u64_le(size))
            .map_err(TransferError::Transport)?;
        debug!(conn_id = peer.id(), filename, size, "Sending file");

        let mut buf = vec![0u8; self.chunk_size];
        let mut remaining = size;
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
            let n = match file.handle.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(StoreError::Io {
                        path: file.path.clone(),
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank"),
                    }
                    .into())
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(StoreError::Io {
                        path: file.path.clone(),
                        source,
                    }
                    .into())
                }
            };

            peer.send(&buf[..n]).map_err(TransferError::Transport)?;
            remaining -= n as u64;
            session.machine.record_sent(n as u64);
        }

        session.file = None;
        session.machine.finish();
        info!(conn_id = peer.id(), filename, size, "File sent");
        Ok(())
    }
}

impl Handler for FileTransferService {
    fn on_connect(&mut self, id: ConnectionId, addr: SocketAddr) {
        info!(conn_id = id, peer = %addr, "Connected");
    }

    fn on_data(&mut self, peer: &mut dyn Peer, data: &[u8]) {
        let conn_id = peer.id();
        let mut session = self
            .sessions
            .remove(&conn_id)
            .unwrap_or_else(|| Session::new(peer.addr()));
        session.cursor.extend(data);

        match self.process(peer, &mut session) {
            Ok(()) => {
                self.sessions.insert(conn_id, session);
            }
            Err(e) => {
                match &e {
                    TransferError::Protocol(_) => warn!(conn_id, error = %e, "Dropping client"),
                    TransferError::Rejected(_) => info!(conn_id, error = %e, "Dropping client"),
                    TransferError::Transport(_) => debug!(conn_id, error = %e, "Dropping client"),
                    TransferError::Filesystem(_) => error!(conn_id, error = %e, "Dropping client"),
                }
                // Dropping the session closes any open file
                drop(session);
                peer.disconnect();
            }
        }
    }

    fn on_disconnect(&mut self, id: ConnectionId, addr: SocketAddr) {
        if let Some(session) = self.sessions.remove(&id) {
            if let Some(transfer) = session.machine.transfer() {
                info!(
                    conn_id = id,
                    direction = ?transfer.direction(),
                    filename = %transfer.filename(),
                    position = transfer.file_position(),
                    size = transfer.file_size(),
                    "Transfer aborted"
                );
            }
            debug!(conn_id = id, peer = %session.addr, "Session released");
        }
        info!(conn_id = id, peer = %addr, "Disconnected");
    }
}

/// Send a confirmation frame: `Ok` for accept/complete, `Err(message)` to
/// reject.
fn send_confirmation(peer: &mut dyn Peer, result: Result<(), &str>) -> io::Result<()> {
    let frame = match result {
        Ok(()) => codec::encode_confirmation(true, None),
        Err(message) => codec::encode_confirmation(false, Some(message)),
    }
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    debug!(conn_id = peer.id(), ok = result.is_ok(), "Sending confirmation");
    peer.send(&frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::transfer::codec::{encode_filename, encode_u64_le};
    use std::fs;

    #[derive(Default)]
    struct TestPeer {
        sent: Vec<u8>,
        closed: bool,
    }

    impl Peer for TestPeer {
        fn id(&self) -> ConnectionId {
            1
        }

        fn addr(&self) -> SocketAddr {
            "127.0.0.1:50001".parse().unwrap()
        }

        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(data);
            Ok(())
        }

        fn disconnect(&mut self) {
            self.closed = true;
        }
    }

    fn service() -> (tempfile::TempDir, FileTransferService) {
        let dir = tempfile::tempdir().unwrap();
        let root = DataRoot::open(dir.path()).unwrap();
        (dir, FileTransferService::new(root, 1024))
    }

    fn upload_header(name: &str, size: u64) -> Vec<u8> {
        let mut bytes = vec![b'U'];
        bytes.extend(encode_filename(name).unwrap());
        bytes.extend(encode_u64_le(size));
        bytes
    }

    fn download_header(name: &str) -> Vec<u8> {
        let mut bytes = vec![b'D'];
        bytes.extend(encode_filename(name).unwrap());
        bytes
    }

    fn feed(service: &mut FileTransferService, peer: &mut TestPeer, input: &[u8], chunk: usize) {
        for piece in input.chunks(chunk) {
            if peer.closed {
                break;
            }
            service.on_data(peer, piece);
        }
    }

    #[test]
    fn test_upload_hello_world() {
        let (dir, mut service) = service();
        let mut peer = TestPeer::default();

        service.on_data(&mut peer, &upload_header("a.txt", 12));
        assert_eq!(peer.sent, [0]);
        assert!(service.has_transfer(1));

        service.on_data(&mut peer, b"hello world!");
        assert_eq!(peer.sent, [0, 0]);
        assert!(!peer.closed);
        assert!(!service.has_transfer(1));
        assert!(!service.has_open_file(1));
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello world!");
    }

    #[test]
    fn test_upload_is_chunk_boundary_independent() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut input = upload_header("data.bin", payload.len() as u64);
        input.extend_from_slice(&payload);

        let mut outputs = Vec::new();
        for chunk in [1, 7, input.len()] {
            let (dir, mut service) = service();
            let mut peer = TestPeer::default();
            feed(&mut service, &mut peer, &input, chunk);

            let stored = fs::read(dir.path().join("data.bin")).unwrap();
            outputs.push((peer.sent, peer.closed, stored));
        }

        assert_eq!(outputs[0].0, [0, 0]);
        assert_eq!(outputs[0].2, payload);
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }

    #[test]
    fn test_download() {
        let (dir, mut service) = service();
        fs::write(dir.path().join("b.bin"), vec![9u8; 3000]).unwrap();

        let mut peer = TestPeer::default();
        service.on_data(&mut peer, &download_header("b.bin"));

        assert_eq!(peer.sent[0], 0);
        assert_eq!(&peer.sent[1..9], &encode_u64_le(3000));
        assert_eq!(&peer.sent[9..], &vec![9u8; 3000][..]);
        assert!(!peer.closed);
        assert!(!service.has_transfer(1));
        assert!(!service.has_open_file(1));
    }

    #[test]
    fn test_download_split_across_chunks() {
        let (dir, mut service) = service();
        fs::write(dir.path().join("c.txt"), b"abc").unwrap();

        let mut peer = TestPeer::default();
        feed(&mut service, &mut peer, &download_header("c.txt"), 1);

        let mut expected = vec![0];
        expected.extend(encode_u64_le(3));
        expected.extend_from_slice(b"abc");
        assert_eq!(peer.sent, expected);
    }

    #[test]
    fn test_download_missing_file() {
        let (_dir, mut service) = service();
        let mut peer = TestPeer::default();
        service.on_data(&mut peer, &download_header("nope.txt"));

        let mut expected = vec![1, FILE_NOT_FOUND.len() as u8];
        expected.extend_from_slice(FILE_NOT_FOUND.as_bytes());
        assert_eq!(peer.sent, expected);
        assert!(peer.closed);
        assert_eq!(service.session_count(), 0);
    }

    #[test]
    fn test_zero_size_upload_rejected() {
        let (dir, mut service) = service();
        let mut peer = TestPeer::default();
        service.on_data(&mut peer, &upload_header("empty.txt", 0));

        assert_eq!(peer.sent[0], 1);
        assert_eq!(&peer.sent[2..], INVALID_FILE_SIZE.as_bytes());
        assert!(peer.closed);
        assert!(!dir.path().join("empty.txt").exists());
    }

    #[test]
    fn test_unknown_action_dropped_silently() {
        let (_dir, mut service) = service();
        let mut peer = TestPeer::default();
        service.on_data(&mut peer, b"X\x05a.txt");

        assert!(peer.sent.is_empty());
        assert!(peer.closed);
        assert_eq!(service.session_count(), 0);
    }

    #[test]
    fn test_zero_filename_length_rejected() {
        let (_dir, mut service) = service();
        let mut peer = TestPeer::default();
        service.on_data(&mut peer, b"D\x00");

        assert_eq!(peer.sent[0], 1);
        assert!(peer.closed);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let (dir, mut service) = service();
        let mut peer = TestPeer::default();
        service.on_data(&mut peer, &upload_header("../escape.txt", 4));

        assert_eq!(peer.sent[0], 1);
        assert_eq!(&peer.sent[2..], INVALID_FILENAME.as_bytes());
        assert!(peer.closed);
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn test_disconnect_mid_upload_releases_file() {
        let (dir, mut service) = service();
        let mut peer = TestPeer::default();

        service.on_data(&mut peer, &upload_header("partial.bin", 100));
        service.on_data(&mut peer, &[1u8; 40]);
        assert!(service.has_open_file(1));

        service.on_disconnect(1, peer.addr());
        assert!(!service.has_open_file(1));
        assert_eq!(service.session_count(), 0);

        // The partial file stays on disk as written
        assert_eq!(fs::read(dir.path().join("partial.bin")).unwrap().len(), 40);
    }

    #[test]
    fn test_back_to_back_transfers() {
        let (dir, mut service) = service();
        let mut peer = TestPeer::default();

        let mut input = upload_header("one.txt", 3);
        input.extend_from_slice(b"abc");
        input.extend(download_header("one.txt"));
        service.on_data(&mut peer, &input);

        let mut expected = vec![0, 0, 0];
        expected.extend(encode_u64_le(3));
        expected.extend_from_slice(b"abc");
        assert_eq!(peer.sent, expected);
        assert!(!peer.closed);
        assert_eq!(fs::read(dir.path().join("one.txt")).unwrap(), b"abc");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (dir, mut service) = service();
        fs::write(dir.path().join("b.txt"), b"bbbb").unwrap();

        struct Other(TestPeer);
        impl Peer for Other {
            fn id(&self) -> ConnectionId {
                2
            }
            fn addr(&self) -> SocketAddr {
                "127.0.0.1:50002".parse().unwrap()
            }
            fn send(&mut self, data: &[u8]) -> io::Result<()> {
                self.0.send(data)
            }
            fn disconnect(&mut self) {
                self.0.disconnect()
            }
        }

        let mut uploader = TestPeer::default();
        let mut downloader = Other(TestPeer::default());

        // Interleave a half-finished upload with a full download
        service.on_data(&mut uploader, &upload_header("a.txt", 10));
        service.on_data(&mut uploader, b"aaaa");
        service.on_data(&mut downloader, &download_header("b.txt"));
        service.on_data(&mut uploader, b"aaaaaa");

        let mut expected = vec![0];
        expected.extend(encode_u64_le(4));
        expected.extend_from_slice(b"bbbb");
        assert_eq!(downloader.0.sent, expected);
        assert_eq!(uploader.sent, [0, 0]);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"aaaaaaaaaa");
    }
}
