//! Single-producer single-consumer task ring
//!
//! Tasks are serialized back to back into one fixed byte buffer:
//!
//! ```text
//! ┌──────────┬─────┬─────┬──────────────┐
//! │ size u32 │ cmd │ pad │ payload ...  │   HEADER_BYTES = 8
//! └──────────┴─────┴─────┴──────────────┘
//! ```
//!
//! The producer owns `tail`, the consumer owns `head`; each index has a
//! single writer so plain atomic loads and stores plus fences are enough. A
//! task never straddles the physical end of the buffer: when it would not fit
//! (with room left for one more header), the producer writes a header with
//! command 0 at `tail` and continues at offset 0. The consumer treats that
//! header as "wrap to start".
//!
//! An empty consumer parks on a futex keyed on `tail`; every commit that
//! lands on a parked consumer wakes it. Closing the queue records a drain
//! limit, clears the running flag, perturbs both indices and wakes the
//! consumer, which then finishes every task committed before the close.

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use platform::display::RESERVED_COMMAND;

/// Bytes of the per-task header.
pub const HEADER_BYTES: usize = 8;

/// Producer back-off while the ring is full.
const FULL_BACKOFF: Duration = Duration::from_micros(100);

/// Fallback park interval where futexes are unavailable.
#[cfg(not(target_os = "linux"))]
const PARK_INTERVAL: Duration = Duration::from_micros(200);

// ---------------------------------------------------------------------------
// Stop flag
// ---------------------------------------------------------------------------

/// Process-wide "keep running" switch shared by the frame loop, the bus
/// thread and blocked producers.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// `true` once shutdown was requested.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Command byte 0 marks a wrap and cannot carry a task.
    #[error("command byte 0x00 is reserved for the wrap marker")]
    ReservedCommand,
    /// The task plus its header and the wrap slack exceed the ring.
    #[error("task of {len} payload bytes can never fit a {capacity} byte queue")]
    TaskTooLarge {
        /// Requested payload bytes.
        len: usize,
        /// Ring capacity in bytes.
        capacity: usize,
    },
    /// Ring capacity outside `[2 * HEADER_BYTES + 1, u32::MAX]`.
    #[error("queue capacity of {0} bytes is unusable")]
    BadCapacity(usize),
    /// The queue was closed or shutdown was requested while waiting for room.
    #[error("task queue closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    buf: Box<[UnsafeCell<u8>]>,
    head: AtomicU32,
    tail: AtomicU32,
    bytes_queued: AtomicUsize,
    running: AtomicBool,
    drain_limit: AtomicU32,
    stop: StopFlag,
}

// SAFETY: the byte buffer is only reached through `bytes`/`bytes_mut`. The
// producer touches `[tail, new_tail)` before publishing `tail`, the consumer
// touches `[head, tail)` after observing it, and the index protocol keeps
// those ranges disjoint. All index fields are atomics.
unsafe impl Sync for Shared {}

impl Shared {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// # Safety
    ///
    /// The caller must hold exclusive access to `[offset, offset + len)`
    /// under the ring protocol.
    #[allow(clippy::mut_from_ref)]
    unsafe fn bytes_mut(&self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let cells = self.buf.get(offset..offset.checked_add(len)?)?;
        // SAFETY: UnsafeCell<u8> has the layout of u8; exclusivity is the
        // caller's obligation.
        Some(unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), len) })
    }

    /// # Safety
    ///
    /// `[offset, offset + len)` must not be written while the slice lives.
    unsafe fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let cells = self.buf.get(offset..offset.checked_add(len)?)?;
        // SAFETY: as in `bytes_mut`; the producer does not write published bytes.
        Some(unsafe { std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()).cast_const(), len) })
    }

    fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.stop.is_raised()
    }

    /// Distance from `from` forward to `to` around the ring.
    #[allow(clippy::arithmetic_side_effects)] // Safety: operands < capacity, capacity > 0
    fn distance(&self, from: u32, to: u32) -> usize {
        let capacity = self.capacity();
        (to as usize + capacity - from as usize) % capacity
    }

    fn holds_tasks_before(&self, mark: u32) -> bool {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        self.distance(head, tail) > self.distance(mark, tail)
    }

    fn wake(&self) {
        futex::wake(&self.tail);
    }
}

fn encode_header(size: u32, command: u8) -> [u8; HEADER_BYTES] {
    let [s0, s1, s2, s3] = size.to_le_bytes();
    [s0, s1, s2, s3, command, 0, 0, 0]
}

fn decode_header(bytes: &[u8]) -> Option<(u32, u8)> {
    match *bytes {
        [s0, s1, s2, s3, command, ..] => Some((u32::from_le_bytes([s0, s1, s2, s3]), command)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A task ring before it is split into its two endpoints.
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    /// Allocate a ring of `capacity` bytes. Producer waits abort once `stop`
    /// is raised.
    pub fn new(capacity: usize, stop: StopFlag) -> Result<Self, QueueError> {
        if capacity <= 2 * HEADER_BYTES || u32::try_from(capacity).is_err() {
            return Err(QueueError::BadCapacity(capacity));
        }
        let buf = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
        tracing::debug!(capacity, "task queue allocated");
        Ok(Self {
            shared: Arc::new(Shared {
                buf,
                head: AtomicU32::new(0),
                tail: AtomicU32::new(0),
                bytes_queued: AtomicUsize::new(0),
                running: AtomicBool::new(true),
                drain_limit: AtomicU32::new(0),
                stop,
            }),
        })
    }

    /// Hand out the producer and consumer endpoints.
    pub fn split(self) -> (Producer, Consumer) {
        (
            Producer {
                shared: Arc::clone(&self.shared),
                tail: 0,
            },
            Consumer {
                shared: self.shared,
                head: 0,
            },
        )
    }
}

/// Read-only view of the ring for pacing and statistics.
#[derive(Clone)]
pub struct QueueMonitor {
    shared: Arc<Shared>,
}

impl QueueMonitor {
    /// Payload plus command bytes committed but not yet retired.
    pub fn bytes_queued(&self) -> usize {
        self.shared.bytes_queued.load(Ordering::Relaxed)
    }

    /// Ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// `false` once the queue was closed.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Consumer read offset.
    pub fn head(&self) -> u32 {
        self.shared.head.load(Ordering::SeqCst)
    }

    /// Producer write offset.
    pub fn tail(&self) -> u32 {
        self.shared.tail.load(Ordering::SeqCst)
    }

    /// `true` while tasks committed before `mark` (a previous tail) are
    /// still waiting to be retired.
    pub fn holds_tasks_before(&self, mark: u32) -> bool {
        self.shared.holds_tasks_before(mark)
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// The writing end. Lives on the frame thread.
pub struct Producer {
    shared: Arc<Shared>,
    tail: u32,
}

/// A reserved, not yet published task.
pub struct PendingTask<'a> {
    producer: &'a mut Producer,
    offset: usize,
    len: usize,
}

impl PendingTask<'_> {
    /// Byte offset of the task header inside the ring.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` for command-only tasks.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writable payload.
    #[allow(clippy::arithmetic_side_effects)] // Safety: offset + HEADER_BYTES + len < capacity, checked on allocate
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: `allocate` reserved [offset, offset + HEADER_BYTES + len)
        // and the consumer cannot reach it before `commit` publishes tail.
        unsafe { self.producer.shared.bytes_mut(self.offset + HEADER_BYTES, self.len) }.unwrap_or_default()
    }

    /// Publish the task to the consumer.
    #[allow(clippy::arithmetic_side_effects)] // Safety: see payload_mut
    pub fn commit(self) {
        let new_tail = self.offset + HEADER_BYTES + self.len;
        self.producer.publish(new_tail, self.len);
    }
}

impl Producer {
    /// Reserve room for a task with `len` payload bytes, blocking while the
    /// ring is full.
    #[allow(clippy::arithmetic_side_effects)] // Safety: sizes are bounded by capacity <= u32::MAX
    pub fn allocate(&mut self, command: u8, len: usize) -> Result<PendingTask<'_>, QueueError> {
        if command == RESERVED_COMMAND {
            return Err(QueueError::ReservedCommand);
        }
        let capacity = self.shared.capacity();
        let needed = len.saturating_add(HEADER_BYTES);
        if needed.saturating_add(HEADER_BYTES) >= capacity {
            return Err(QueueError::TaskTooLarge { len, capacity });
        }
        if !self.shared.is_open() {
            return Err(QueueError::Closed);
        }

        let mut tail = self.tail as usize;
        let mut new_tail = tail + needed;
        if new_tail + HEADER_BYTES >= capacity {
            // Head must be at or before tail, and past 0 so that tail = 0
            // cannot read as an empty ring while data is still queued.
            self.spin_while(|head| head > tail || head == 0)?;
            self.write_header(tail, 0, RESERVED_COMMAND);
            fence(Ordering::SeqCst);
            self.shared.tail.store(0, Ordering::SeqCst);
            self.tail = 0;
            fence(Ordering::SeqCst);
            if self.shared.head.load(Ordering::SeqCst) as usize == tail {
                self.shared.wake();
            }
            tracing::trace!(at = tail, "task queue wrapped");
            tail = 0;
            new_tail = needed;
        }

        self.sleep_while(|head| head > tail && head <= new_tail)?;
        #[allow(clippy::cast_possible_truncation)] // len < capacity <= u32::MAX
        let size = len as u32;
        self.write_header(tail, size, command);
        Ok(PendingTask {
            producer: self,
            offset: tail,
            len,
        })
    }

    /// Allocate, copy `payload` in and commit.
    pub fn push(&mut self, command: u8, payload: &[u8]) -> Result<(), QueueError> {
        let mut task = self.allocate(command, payload.len())?;
        task.payload_mut().copy_from_slice(payload);
        task.commit();
        Ok(())
    }

    /// Current tail, usable as a frame-end mark.
    pub fn tail(&self) -> u32 {
        self.tail
    }

    /// Read-only view for pacing and statistics.
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop accepting tasks and let the consumer drain what was committed.
    /// Idempotent.
    pub fn close(&mut self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        self.shared.drain_limit.store(self.tail, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        // Perturb both indices so a consumer about to park sees a changed
        // tail and the futex wait returns at once.
        self.shared.head.fetch_add(1, Ordering::SeqCst);
        self.shared.tail.fetch_add(1, Ordering::SeqCst);
        self.shared.wake();
        tracing::debug!(drain_limit = self.tail, "task queue closed");
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: one committed task always fits below capacity
    fn publish(&mut self, new_tail: usize, len: usize) {
        fence(Ordering::SeqCst);
        let old_tail = self.tail;
        self.shared.bytes_queued.fetch_add(len + 1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)] // new_tail < capacity <= u32::MAX
        let new_tail = new_tail as u32;
        self.shared.tail.store(new_tail, Ordering::SeqCst);
        self.tail = new_tail;
        fence(Ordering::SeqCst);
        if self.shared.head.load(Ordering::SeqCst) == old_tail {
            self.shared.wake();
        }
    }

    fn write_header(&mut self, offset: usize, size: u32, command: u8) {
        // SAFETY: the caller has just established that [offset, offset +
        // HEADER_BYTES) lies outside [head, tail).
        if let Some(slot) = unsafe { self.shared.bytes_mut(offset, HEADER_BYTES) } {
            slot.copy_from_slice(&encode_header(size, command));
        }
    }

    fn spin_while(&self, mut blocked: impl FnMut(usize) -> bool) -> Result<(), QueueError> {
        while blocked(self.shared.head.load(Ordering::SeqCst) as usize) {
            if !self.shared.is_open() {
                return Err(QueueError::Closed);
            }
            std::hint::spin_loop();
        }
        Ok(())
    }

    fn sleep_while(&self, mut blocked: impl FnMut(usize) -> bool) -> Result<(), QueueError> {
        while blocked(self.shared.head.load(Ordering::SeqCst) as usize) {
            if !self.shared.is_open() {
                return Err(QueueError::Closed);
            }
            thread::sleep(FULL_BACKOFF);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// A committed task at the front of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    /// Command byte.
    pub command: u8,
    offset: u32,
    len: u32,
}

impl Task {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// `true` for command-only tasks.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Result of polling the consumer end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// A task is ready to transmit.
    Ready(Task),
    /// Nothing queued; park and retry.
    Empty,
    /// The queue was closed and every committed task has been retired.
    Drained,
}

/// The reading end. Lives on the bus thread.
pub struct Consumer {
    shared: Arc<Shared>,
    head: u32,
}

impl Consumer {
    /// Front task, if any. Does not advance past it; call [`retire`](Self::retire)
    /// after transmission.
    #[allow(clippy::arithmetic_side_effects)] // Safety: head + HEADER_BYTES < capacity by the ring layout
    #[allow(clippy::cast_possible_truncation)] // HEADER_BYTES is 8
    pub fn next_task(&mut self) -> Poll {
        // Tail first: a running flag still set afterwards proves the tail was
        // read before any close perturbed it.
        let tail = self.shared.tail.load(Ordering::SeqCst);
        let running = self.shared.running.load(Ordering::SeqCst);
        let (limit, exhausted) = if running {
            (tail, Poll::Empty)
        } else {
            (self.shared.drain_limit.load(Ordering::SeqCst), Poll::Drained)
        };
        if self.head == limit {
            return exhausted;
        }

        let Some((mut size, mut command)) = self.header(self.head) else {
            tracing::error!(head = self.head, "task header outside the ring");
            return Poll::Drained;
        };
        if command == RESERVED_COMMAND {
            self.head = 0;
            self.shared.head.store(0, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            if limit == 0 {
                return exhausted;
            }
            let Some(front) = self.header(0) else {
                return Poll::Drained;
            };
            (size, command) = front;
        }
        Poll::Ready(Task {
            command,
            offset: self.head + HEADER_BYTES as u32,
            len: size,
        })
    }

    /// Payload bytes of `task`.
    pub fn payload(&self, task: &Task) -> &[u8] {
        // SAFETY: the task is published and not yet retired, so the producer
        // will not write its bytes.
        unsafe { self.shared.bytes(task.offset as usize, task.len as usize) }.unwrap_or_default()
    }

    /// Release `task`'s bytes back to the producer.
    #[allow(clippy::arithmetic_side_effects)] // Safety: offset + len < capacity
    pub fn retire(&mut self, task: Task) {
        self.shared
            .bytes_queued
            .fetch_sub(task.len as usize + 1, Ordering::Relaxed);
        self.head = task.offset + task.len;
        self.shared.head.store(self.head, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Block until the producer commits past the current head, the queue is
    /// closed, or a spurious wakeup occurs.
    pub fn park(&self) {
        futex::wait(&self.shared.tail, self.head);
    }

    /// `false` once the queue was closed.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn header(&self, offset: u32) -> Option<(u32, u8)> {
        // SAFETY: a header at a published offset is never rewritten before
        // the consumer moves past it.
        decode_header(unsafe { self.shared.bytes(offset as usize, HEADER_BYTES) }?)
    }
}

// ---------------------------------------------------------------------------
// Futex
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
mod futex {
    use std::sync::atomic::AtomicU32;

    /// Sleep while `word` still holds `expected`.
    pub(super) fn wait(word: &AtomicU32, expected: u32) {
        // SAFETY: `word` is a live, aligned u32 for the whole call; FUTEX_WAIT
        // only reads it and a null timeout means "no timeout".
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                std::ptr::null::<libc::timespec>(),
            );
        }
    }

    /// Wake one waiter parked on `word`.
    pub(super) fn wake(word: &AtomicU32) {
        // SAFETY: as in `wait`; FUTEX_WAKE does not touch the word's value.
        unsafe {
            libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG, 1);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod futex {
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(super) fn wait(word: &AtomicU32, expected: u32) {
        if word.load(Ordering::SeqCst) == expected {
            std::thread::sleep(super::PARK_INTERVAL);
        }
    }

    pub(super) fn wake(_word: &AtomicU32) {}
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> (Producer, Consumer) {
        TaskQueue::new(capacity, StopFlag::new()).unwrap().split()
    }

    fn pop(consumer: &mut Consumer) -> Option<(u8, Vec<u8>)> {
        match consumer.next_task() {
            Poll::Ready(task) => {
                let payload = consumer.payload(&task).to_vec();
                consumer.retire(task);
                Some((task.command, payload))
            }
            Poll::Empty | Poll::Drained => None,
        }
    }

    #[test]
    fn fifo_order_and_byte_accounting() {
        let (mut producer, mut consumer) = queue(256);
        let monitor = producer.monitor();
        producer.push(0x2A, &[0, 1, 0, 9]).unwrap();
        producer.push(0x29, &[]).unwrap();
        assert_eq!(monitor.bytes_queued(), 5 + 1);

        assert_eq!(pop(&mut consumer), Some((0x2A, vec![0, 1, 0, 9])));
        assert_eq!(monitor.bytes_queued(), 1);
        assert_eq!(pop(&mut consumer), Some((0x29, vec![])));
        assert_eq!(monitor.bytes_queued(), 0);
        assert_eq!(consumer.next_task(), Poll::Empty);
        assert_eq!(monitor.head(), monitor.tail());
        assert_eq!(monitor.tail() as usize, 2 * HEADER_BYTES + 4);
    }

    #[test]
    fn rejects_reserved_command_and_oversized_tasks() {
        let (mut producer, _consumer) = queue(64);
        assert_eq!(producer.push(0, &[1]).unwrap_err(), QueueError::ReservedCommand);
        assert_eq!(
            producer.allocate(0x2C, 48).err(),
            Some(QueueError::TaskTooLarge { len: 48, capacity: 64 })
        );
        assert!(producer.allocate(0x2C, 47).is_ok());
    }

    #[test]
    fn bad_capacity_is_rejected() {
        assert!(matches!(
            TaskQueue::new(16, StopFlag::new()),
            Err(QueueError::BadCapacity(16))
        ));
    }

    #[test]
    fn wraps_through_sentinel() {
        let (mut producer, mut consumer) = queue(64);
        producer.push(0x2C, &[1; 16]).unwrap(); // [0, 24)
        producer.push(0x2C, &[2; 16]).unwrap(); // [24, 48)
        assert_eq!(producer.tail(), 48);
        assert_eq!(pop(&mut consumer).unwrap().1, vec![1; 16]);
        assert_eq!(pop(&mut consumer).unwrap().1, vec![2; 16]);

        // 48 + 24 + 8 does not fit: sentinel at 48, task at 0
        let task = producer.allocate(0x2C, 16).unwrap();
        assert_eq!(task.offset(), 0);
        let mut task = task;
        task.payload_mut().fill(3);
        task.commit();
        assert_eq!(producer.tail(), 24);
        assert_eq!(pop(&mut consumer), Some((0x2C, vec![3; 16])));
        assert_eq!(consumer.next_task(), Poll::Empty);
    }

    #[test]
    fn close_drains_committed_tasks() {
        let (mut producer, mut consumer) = queue(128);
        producer.push(0x2B, &[0, 5]).unwrap();
        producer.push(0x2C, &[7, 7]).unwrap();
        producer.close();
        producer.close();
        assert!(!consumer.is_running());
        assert_eq!(producer.push(0x2C, &[1]).unwrap_err(), QueueError::Closed);

        assert_eq!(pop(&mut consumer), Some((0x2B, vec![0, 5])));
        assert_eq!(pop(&mut consumer), Some((0x2C, vec![7, 7])));
        assert_eq!(consumer.next_task(), Poll::Drained);
    }

    #[test]
    fn stop_flag_refuses_new_tasks() {
        let stop = StopFlag::new();
        let (mut producer, _consumer) = TaskQueue::new(64, stop.clone()).unwrap().split();
        stop.raise();
        assert_eq!(producer.push(0x2C, &[1]).unwrap_err(), QueueError::Closed);
    }

    #[test]
    fn frame_marks_track_consumer_progress() {
        let (mut producer, mut consumer) = queue(256);
        let monitor = producer.monitor();
        let start = producer.tail();
        producer.push(0x2C, &[0; 8]).unwrap();
        let frame_end = producer.tail();
        producer.push(0x2C, &[0; 8]).unwrap();

        assert!(monitor.holds_tasks_before(frame_end));
        pop(&mut consumer).unwrap();
        assert!(!monitor.holds_tasks_before(frame_end));
        assert!(!monitor.holds_tasks_before(start));
    }

    #[test]
    fn park_returns_after_close() {
        let (mut producer, consumer) = queue(64);
        let parked = thread::spawn(move || {
            consumer.park();
            consumer.is_running()
        });
        thread::sleep(Duration::from_millis(20));
        producer.close();
        assert!(!parked.join().unwrap());
    }
}
