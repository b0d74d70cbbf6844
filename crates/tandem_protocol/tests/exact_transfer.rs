//! Property tests for exact-length payload transfer over chunked streams.

use proptest::prelude::*;
use std::io::{self, Cursor, Read};
use tandem_protocol::{copy_exact, ProtocolError, Request, SyncEntry};

/// A reader that delivers its bytes in a fixed sequence of chunk sizes.
struct Chunked {
    data: Vec<u8>,
    pos: usize,
    chunks: Vec<usize>,
    next: usize,
}

impl Chunked {
    fn new(data: Vec<u8>, chunks: Vec<usize>) -> Self {
        Self {
            data,
            pos: 0,
            chunks,
            next: 0,
        }
    }
}

impl Read for Chunked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = if self.chunks.is_empty() {
            1
        } else {
            self.chunks[self.next % self.chunks.len()]
        };
        self.next += 1;
        let n = chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn sync_frame(name: &str, payload: &[u8], declared: u64) -> Vec<u8> {
    let mut frame = Vec::new();
    Request::sync(1).write_to(&mut frame).unwrap();
    SyncEntry::new(name, declared).write_to(&mut frame).unwrap();
    frame.extend_from_slice(payload);
    frame
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn receiver_writes_exactly_declared_size(
        payload in prop::collection::vec(any::<u8>(), 0..20_000),
        chunks in prop::collection::vec(1usize..600, 1..8),
    ) {
        let frame = sync_frame("data.bin", &payload, payload.len() as u64);
        let mut reader = Chunked::new(frame, chunks);

        let request = Request::read_from(&mut reader).unwrap();
        prop_assert_eq!(request, Request::sync(1));
        let entry = SyncEntry::read_from(&mut reader).unwrap();

        let mut out = Vec::new();
        let written = copy_exact(&mut reader, &mut out, entry.size).unwrap();
        prop_assert_eq!(written, payload.len() as u64);
        prop_assert_eq!(out, payload);
    }

    #[test]
    fn one_byte_short_is_an_error(
        payload in prop::collection::vec(any::<u8>(), 1..5_000),
        chunks in prop::collection::vec(1usize..300, 1..6),
    ) {
        let declared = payload.len() as u64;
        let frame = sync_frame("data.bin", &payload[..payload.len() - 1], declared);
        let mut reader = Chunked::new(frame, chunks);

        Request::read_from(&mut reader).unwrap();
        let entry = SyncEntry::read_from(&mut reader).unwrap();

        let result = copy_exact(&mut reader, &mut Vec::new(), entry.size);
        match result {
            Err(ProtocolError::ShortRead { expected, received }) => {
                prop_assert_eq!(expected, declared);
                prop_assert_eq!(received, declared - 1);
            }
            other => prop_assert!(false, "expected short read, got {:?}", other),
        }
    }
}

#[test]
fn header_truncated_mid_frame() {
    let mut frame = sync_frame("data.bin", b"abc", 3);
    // Command (6) + count (4) + the first half of the name frame.
    frame.truncate(15);

    let mut reader = Cursor::new(frame);
    Request::read_from(&mut reader).unwrap();
    let err = SyncEntry::read_from(&mut reader).unwrap_err();
    assert!(err.is_truncation());
}
