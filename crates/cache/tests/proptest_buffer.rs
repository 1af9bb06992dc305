//! Property tests for the stream buffer

use outcache::StreamBuffer;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::io::Cursor;

#[derive(Debug, Clone)]
enum Op {
    Write(Vec<u8>),
    Read(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..300).prop_map(Op::Write),
        (0usize..400).prop_map(Op::Read),
    ]
}

proptest! {
    #[test]
    fn interleaved_writes_and_reads_follow_a_fifo(
        initial in 1usize..64,
        max in 1usize..256,
        ops in prop::collection::vec(op(), 0..60),
    ) {
        let mut buffer = StreamBuffer::with_chunk_limits(initial, max);
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                Op::Write(bytes) => {
                    buffer.write_bytes(&bytes);
                    model.extend(bytes);
                }
                Op::Read(n) => {
                    let mut out = vec![0u8; n];
                    let read = buffer.read_into(&mut out).unwrap();
                    prop_assert_eq!(read, n.min(model.len()));
                    let expected: Vec<u8> = model.drain(..read).collect();
                    prop_assert_eq!(&out[..read], &expected[..]);
                }
            }
            prop_assert_eq!(buffer.total_bytes_unread(), model.len());
        }

        let rest = buffer.read_as_bytes().unwrap();
        prop_assert_eq!(rest, model.into_iter().collect::<Vec<_>>());
        prop_assert!(buffer.is_empty());
    }

    #[test]
    fn chunk_size_does_not_change_content(
        data in prop::collection::vec(any::<u8>(), 0..5000),
        chunk_size in 1usize..2048,
    ) {
        let mut buffer = StreamBuffer::with_chunk_size(chunk_size);
        let read = buffer.read_fully(&mut Cursor::new(&data)).unwrap();
        prop_assert_eq!(read, data.len() as u64);
        prop_assert_eq!(buffer.total_bytes_unread(), data.len());

        let mut sink = Vec::new();
        let written = buffer.write_to(&mut sink).unwrap();
        prop_assert_eq!(written, data.len() as u64);
        prop_assert_eq!(sink, data);
        prop_assert_eq!(buffer.total_bytes_unread(), 0);
    }

    #[test]
    fn exact_reads_split_anywhere(
        data in prop::collection::vec(any::<u8>(), 1..3000),
        split in any::<prop::sample::Index>(),
    ) {
        let at = split.index(data.len());
        let mut source = Cursor::new(&data);
        let mut buffer = StreamBuffer::with_size_hint(at);
        buffer.read_from(&mut source, at).unwrap();
        buffer.read_from(&mut source, data.len() - at).unwrap();
        prop_assert_eq!(buffer.read_as_bytes().unwrap(), data);
    }
}

#[test]
fn reading_past_the_source_fails() {
    let mut buffer = StreamBuffer::new();
    let err = buffer
        .read_from(&mut Cursor::new(b"abc"), 10)
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    assert_eq!(buffer.total_bytes_unread(), 3);
}
