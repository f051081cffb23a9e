//! Cross-thread tests for the task ring.
//! One producer thread and one consumer thread, the way the mirror runs them.
//!
//! Run with: cargo test -p spibus --test queue_threads

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]
#![allow(clippy::cast_possible_truncation)]

use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use spibus::{Consumer, Poll, QueueError, StopFlag, TaskQueue, HEADER_BYTES};

/// Drain until the queue reports closed-and-empty.
fn collect(consumer: &mut Consumer) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    loop {
        match consumer.next_task() {
            Poll::Ready(task) => {
                out.push((task.command, consumer.payload(&task).to_vec()));
                consumer.retire(task);
            }
            Poll::Empty => consumer.park(),
            Poll::Drained => return out,
        }
    }
}

// ---------------------------------------------------------------------------
// Wrap-around
// ---------------------------------------------------------------------------

#[test]
fn allocate_wraps_to_start_once_head_moves() {
    let (mut producer, mut consumer) = TaskQueue::new(128, StopFlag::new()).unwrap().split();
    producer.push(0x2C, &[1; 40]).unwrap();
    producer.push(0x2C, &[2; 40]).unwrap();
    assert_eq!(producer.tail() as usize, 2 * (HEADER_BYTES + 40));

    let retire_first = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let Poll::Ready(task) = consumer.next_task() else {
            panic!("first task missing");
        };
        assert_eq!(consumer.payload(&task), &[1; 40][..]);
        consumer.retire(task);
        consumer
    });

    // 96 + 8 + 20 leaves no room for a trailing header in a 128 byte ring
    let mut task = producer.allocate(0x2A, 20).unwrap();
    assert_eq!(task.offset(), 0);
    task.payload_mut().fill(3);
    task.commit();
    producer.close();

    let mut consumer = retire_first.join().unwrap();
    let rest = collect(&mut consumer);
    assert_eq!(rest, vec![(0x2C, vec![2; 40]), (0x2A, vec![3; 20])]);
}

#[test]
fn blocked_producer_gives_up_on_stop() {
    let stop = StopFlag::new();
    let (mut producer, _consumer) = TaskQueue::new(128, stop.clone()).unwrap().split();
    producer.push(0x2C, &[0; 100]).unwrap();

    let raiser = {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop.raise();
        })
    };
    assert_eq!(producer.allocate(0x2C, 60).err(), Some(QueueError::Closed));
    raiser.join().unwrap();
}

#[test]
fn parked_consumer_wakes_on_commit() {
    let (mut producer, mut consumer) = TaskQueue::new(256, StopFlag::new()).unwrap().split();
    let reader = thread::spawn(move || collect(&mut consumer));

    for i in 1..=5u8 {
        thread::sleep(Duration::from_millis(5));
        producer.push(i, &[i; 3]).unwrap();
    }
    producer.close();

    let seen = reader.join().unwrap();
    assert_eq!(seen.len(), 5);
    assert!(seen.iter().enumerate().all(|(i, (cmd, _))| usize::from(*cmd) == i + 1));
}

// ---------------------------------------------------------------------------
// FIFO under load
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn tasks_arrive_in_order_and_intact(
        tasks in prop::collection::vec((1u8..=255, 0usize..200), 1..120),
        capacity in 256usize..1024,
    ) {
        let (mut producer, mut consumer) = TaskQueue::new(capacity, StopFlag::new()).unwrap().split();
        let monitor = producer.monitor();
        let reader = thread::spawn(move || collect(&mut consumer));

        let expected: Vec<(u8, Vec<u8>)> = tasks
            .iter()
            .enumerate()
            .map(|(i, &(cmd, len))| (cmd, (0..len).map(|b| (b + i) as u8).collect()))
            .collect();
        for (cmd, payload) in &expected {
            producer.push(*cmd, payload).unwrap();
        }
        producer.close();

        let seen = reader.join().unwrap();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(monitor.bytes_queued(), 0);
        prop_assert!(!monitor.is_running());
    }
}
