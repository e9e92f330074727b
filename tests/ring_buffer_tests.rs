use soundio::ring_buffer::{RingBuffer, PAGE_SIZE};
use std::thread;

#[test]
fn test_capacity_rounds_up_to_page() {
    let ring = RingBuffer::new(100).unwrap();
    assert_eq!(ring.capacity(), PAGE_SIZE);
    let ring = RingBuffer::new(PAGE_SIZE + 1).unwrap();
    assert_eq!(ring.capacity(), 2 * PAGE_SIZE);
}

#[test]
fn test_push_pop_wraps_around() {
    let (mut producer, mut consumer) = RingBuffer::new(PAGE_SIZE).unwrap().split();
    let chunk: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let mut out = vec![0u8; 3000];

    for _ in 0..5 {
        assert_eq!(producer.push(&chunk), 3000);
        assert_eq!(consumer.fill_count(), 3000);
        assert_eq!(consumer.pop(&mut out), 3000);
        assert_eq!(out, chunk);
        assert_eq!(producer.free_count(), PAGE_SIZE);
    }
}

#[test]
fn test_push_stops_when_full() {
    let (mut producer, consumer) = RingBuffer::new(PAGE_SIZE).unwrap().split();
    let data = vec![7u8; PAGE_SIZE + 10];
    assert_eq!(producer.push(&data), PAGE_SIZE);
    assert_eq!(producer.free_count(), 0);
    assert_eq!(consumer.fill_count(), PAGE_SIZE);
}

#[test]
fn test_peek_does_not_consume() {
    let (mut producer, mut consumer) = RingBuffer::new(PAGE_SIZE).unwrap().split();
    producer.push(&[1, 2, 3, 4]);
    let mut out = [0u8; 4];
    assert_eq!(consumer.peek(&mut out), 4);
    assert_eq!(consumer.fill_count(), 4);
    consumer.consume(2);
    assert_eq!(consumer.pop(&mut out), 2);
    assert_eq!(&out[..2], &[3, 4]);
}

#[test]
fn test_clear_empties_buffer() {
    let (mut producer, mut consumer) = RingBuffer::new(PAGE_SIZE).unwrap().split();
    producer.push(&[9u8; 512]);
    consumer.clear();
    assert_eq!(consumer.fill_count(), 0);
    assert_eq!(producer.free_count(), PAGE_SIZE);
}

#[test]
fn test_writable_slice_and_commit() {
    let (mut producer, consumer) = RingBuffer::new(PAGE_SIZE).unwrap().split();
    let slice = producer.writable_slice();
    assert!(!slice.is_empty());
    slice[..3].copy_from_slice(&[5, 6, 7]);
    producer.commit(3);
    assert_eq!(consumer.readable_slice(), &[5, 6, 7]);
}

#[test]
fn test_cross_thread_transfer() {
    let (mut producer, mut consumer) = RingBuffer::new(PAGE_SIZE).unwrap().split();
    const TOTAL: usize = 64 * 1024;

    let writer = thread::spawn(move || {
        let mut sent = 0usize;
        while sent < TOTAL {
            let byte = [(sent % 256) as u8];
            if producer.push(&byte) == 1 {
                sent += 1;
            } else {
                thread::yield_now();
            }
        }
    });

    let mut received = 0usize;
    let mut buf = [0u8; 256];
    while received < TOTAL {
        let n = consumer.pop(&mut buf);
        for b in &buf[..n] {
            assert_eq!(*b, (received % 256) as u8);
            received += 1;
        }
        if n == 0 {
            thread::yield_now();
        }
    }
    writer.join().unwrap();
}
