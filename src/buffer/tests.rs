use std::io::SeekFrom;

use crate::buffer::*;

#[test]
fn test_fixed_append_read() {
    let mut buffer = FixedBuffer::new(1024);
    assert!(buffer.append(&[1, 2, 3, 4, 5]));
    assert_eq!(buffer.len(), 5);

    let mut out = [0u8; 3];
    assert_eq!(buffer.read(&mut out), ReadOutcome::Copied(3));
    assert_eq!(out, [1, 2, 3]);
    assert_eq!(buffer.position(), 3);
}

#[test]
fn test_fixed_would_block_then_eof() {
    let mut buffer = FixedBuffer::new(64);
    buffer.append(&[9, 9]);
    let mut out = [0u8; 8];
    assert_eq!(buffer.read(&mut out), ReadOutcome::Copied(2));
    // Drained but still filling.
    assert_eq!(buffer.read(&mut out), ReadOutcome::WouldBlock);
    buffer.set_eof();
    assert_eq!(buffer.read(&mut out), ReadOutcome::Eof);
}

#[test]
fn test_fixed_exact_capacity_accepted() {
    let mut buffer = FixedBuffer::new(8);
    assert!(buffer.append(&[0u8; 8]));
    assert_eq!(buffer.len(), 8);
}

#[test]
fn test_fixed_over_capacity_rejected_without_partial_write() {
    let mut buffer = FixedBuffer::new(8);
    assert!(buffer.append(&[0u8; 6]));
    assert!(!buffer.append(&[0u8; 3]));
    // Nothing of the rejected write landed.
    assert_eq!(buffer.len(), 6);
}

#[test]
fn test_fixed_seek_set_cur_end() {
    let mut buffer = FixedBuffer::new(64);
    buffer.append(&[0, 1, 2, 3, 4, 5, 6, 7]);

    assert_eq!(buffer.seek(SeekFrom::Start(4)), Ok(4));
    assert_eq!(buffer.seek(SeekFrom::Current(-2)), Ok(2));
    assert_eq!(buffer.seek(SeekFrom::End(-1)), Ok(7));
    assert_eq!(buffer.seek(SeekFrom::Start(99)), Err(SeekError::InvalidSeek));
    // Failed seek leaves the cursor alone.
    assert_eq!(buffer.position(), 7);
}

#[test]
fn test_fixed_read_front_does_not_advance() {
    let mut buffer = FixedBuffer::new(64);
    buffer.append(&[7, 8, 9]);
    let mut probe = Vec::new();
    buffer.read_front(&mut probe, 16);
    assert_eq!(probe, vec![7, 8, 9]);
    assert_eq!(buffer.position(), 0);
}

#[test]
fn test_chained_sequential_read_across_chunks() {
    let mut queue = ChainedQueue::new();
    queue.append(&[1, 2, 3]);
    queue.append(&[4, 5]);
    queue.append(&[6]);

    let mut out = [0u8; 4];
    assert_eq!(queue.read(&mut out), ReadOutcome::Copied(4));
    assert_eq!(out, [1, 2, 3, 4]);
    assert_eq!(queue.pending(), 2);

    let mut rest = [0u8; 8];
    assert_eq!(queue.read(&mut rest), ReadOutcome::Copied(2));
    assert_eq!(&rest[..2], &[5, 6]);
}

#[test]
fn test_chained_would_block_then_eof() {
    let mut queue = ChainedQueue::new();
    let mut out = [0u8; 4];
    assert_eq!(queue.read(&mut out), ReadOutcome::WouldBlock);
    queue.append(&[1]);
    assert_eq!(queue.read(&mut out), ReadOutcome::Copied(1));
    queue.set_eof();
    assert_eq!(queue.read(&mut out), ReadOutcome::Eof);
}

#[test]
fn test_chained_seek_unsupported() {
    let mut queue = ChainedQueue::new();
    queue.append(&[1, 2, 3]);
    let mut out = [0u8; 2];
    queue.read(&mut out);

    assert_eq!(queue.seek(SeekFrom::Current(0)), Ok(2));
    assert_eq!(queue.seek(SeekFrom::Start(0)), Err(SeekError::Unsupported));
    assert_eq!(queue.seek(SeekFrom::Current(1)), Err(SeekError::Unsupported));
    assert_eq!(queue.seek(SeekFrom::End(0)), Err(SeekError::Unsupported));
}

#[test]
fn test_chained_read_front_spans_chunks() {
    let mut queue = ChainedQueue::new();
    queue.append(&[1, 2]);
    queue.append(&[3, 4, 5]);
    let mut out = [0u8; 1];
    queue.read(&mut out); // cursor at 1, inside the first chunk

    let mut probe = Vec::new();
    queue.read_front(&mut probe, 3);
    assert_eq!(probe, vec![2, 3, 4]);
    assert_eq!(queue.position(), 1);
}

#[test]
fn test_source_dispatch() {
    let mut source = ByteSource::Fixed(FixedBuffer::new(16));
    assert!(source.is_seekable());
    assert!(source.append(&[1, 2]));
    assert_eq!(source.len(), 2);

    let mut source = ByteSource::Chained(ChainedQueue::new());
    assert!(!source.is_seekable());
    assert!(source.append(&[1, 2, 3]));
    assert_eq!(source.pending(), 3);
}

#[test]
fn test_bytes_observed_exactly_once_in_order() {
    // Every appended byte must be observed exactly once, in write order,
    // regardless of chunking on either side.
    let mut queue = ChainedQueue::new();
    let mut expected = Vec::new();
    for i in 0..50u8 {
        let chunk: Vec<u8> = (0..((i % 7) + 1)).map(|j| i.wrapping_mul(7).wrapping_add(j)).collect();
        expected.extend_from_slice(&chunk);
        queue.append(&chunk);
    }
    queue.set_eof();

    let mut observed = Vec::new();
    let mut buf = [0u8; 13];
    loop {
        match queue.read(&mut buf) {
            ReadOutcome::Copied(n) => observed.extend_from_slice(&buf[..n]),
            ReadOutcome::Eof => break,
            ReadOutcome::WouldBlock => panic!("eof latched, should never block"),
        }
    }
    assert_eq!(observed, expected);
}
