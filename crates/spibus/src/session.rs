//! Bus thread lifecycle
//!
//! A [`BusSession`] owns the task ring and the one thread that drains it.
//! The frame loop holds the session and queues through
//! [`producer`](BusSession::producer); the bus thread moves the transport in
//! and transmits tasks in bursts, one transfer window per burst, parking on
//! the ring's futex when it runs dry.
//!
//! Shutdown closes the ring. The thread then transmits every task committed
//! before the close and exits with a [`BusReport`].

use std::io;
use std::thread::{self, JoinHandle};

use embedded_hal::digital::OutputPin;
use platform::RegisterBlock;

use crate::queue::{Consumer, Poll, Producer, QueueError, QueueMonitor, StopFlag, TaskQueue};
use crate::transport::{SpiTransport, TransportError};

/// Name of the bus thread.
pub const THREAD_NAME: &str = "spi-bus";

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The ring could not be created.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The bus thread could not be started.
    #[error("failed to spawn the bus thread")]
    Spawn(#[source] io::Error),
    /// The bus thread stopped on a transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The bus thread panicked.
    #[error("bus thread panicked")]
    Panicked,
}

/// What the bus thread did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusReport {
    /// Tasks transmitted.
    pub tasks: u64,
    /// Bytes shifted out, command bytes included.
    pub bytes: u64,
    /// Transfer windows opened.
    pub bursts: u64,
    /// Times the thread parked on an empty ring.
    pub parks: u64,
}

/// Task ring plus the thread transmitting it.
pub struct BusSession {
    producer: Producer,
    worker: Option<JoinHandle<Result<BusReport, TransportError>>>,
}

impl BusSession {
    /// Create a `queue_bytes` ring and start the bus thread on `transport`.
    ///
    /// A transport failure on the bus thread raises `stop`, so a producer
    /// blocked on a full ring gives up instead of waiting forever.
    pub fn start<R, DC>(queue_bytes: usize, transport: SpiTransport<R, DC>, stop: StopFlag) -> Result<Self, SessionError>
    where
        R: RegisterBlock + Send + 'static,
        DC: OutputPin + Send + 'static,
    {
        let (producer, consumer) = TaskQueue::new(queue_bytes, stop.clone())?.split();
        let worker = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                let result = drain(transport, consumer);
                if let Err(err) = &result {
                    tracing::error!(error = %err, "bus thread failed");
                    stop.raise();
                }
                result
            })
            .map_err(SessionError::Spawn)?;
        tracing::info!(queue_bytes, "bus thread started");
        Ok(Self {
            producer,
            worker: Some(worker),
        })
    }

    /// The producing end of the ring.
    pub fn producer(&mut self) -> &mut Producer {
        &mut self.producer
    }

    /// Read-only view of the ring.
    pub fn monitor(&self) -> QueueMonitor {
        self.producer.monitor()
    }

    /// Close the ring, wait for the bus thread to drain it and collect its
    /// report.
    pub fn shutdown(mut self) -> Result<BusReport, SessionError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<BusReport, SessionError> {
        self.producer.close();
        let Some(worker) = self.worker.take() else {
            return Ok(BusReport::default());
        };
        let report = worker.join().map_err(|_| SessionError::Panicked)??;
        tracing::info!(
            tasks = report.tasks,
            bytes = report.bytes,
            bursts = report.bursts,
            parks = report.parks,
            "bus thread stopped"
        );
        Ok(report)
    }
}

impl Drop for BusSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.finish() {
                tracing::warn!(error = %err, "bus session dropped with an error");
            }
        }
    }
}

/// Bus thread body.
#[allow(clippy::arithmetic_side_effects)] // Safety: u64 counters
fn drain<R: RegisterBlock, DC: OutputPin>(
    mut transport: SpiTransport<R, DC>,
    mut consumer: Consumer,
) -> Result<BusReport, TransportError> {
    let mut report = BusReport::default();
    loop {
        match consumer.next_task() {
            Poll::Ready(first) => {
                transport.begin();
                report.bursts += 1;
                let mut next = Poll::Ready(first);
                while let Poll::Ready(task) = next {
                    transport.run_task(task.command, consumer.payload(&task))?;
                    report.tasks += 1;
                    report.bytes += task.len() as u64 + 1;
                    consumer.retire(task);
                    next = consumer.next_task();
                }
                transport.end();
                if next == Poll::Drained {
                    return Ok(report);
                }
            }
            Poll::Empty => {
                report.parks += 1;
                consumer.park();
            }
            Poll::Drained => return Ok(report),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPeripherals;
    use platform::GpioBank;

    const DC_PIN: u8 = 25;

    fn session(sim: &SimulatedPeripherals, stop: StopFlag) -> BusSession {
        let dc = GpioBank::new(sim.clone()).output(DC_PIN).unwrap();
        BusSession::start(1024, SpiTransport::new(sim.clone(), dc), stop).unwrap()
    }

    #[test]
    fn shutdown_drains_committed_tasks() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        let mut session = session(&sim, StopFlag::new());
        for _ in 0..50 {
            session.producer().push(0x2C, &[0xAB; 10]).unwrap();
        }
        let report = session.shutdown().unwrap();
        assert_eq!(report.tasks, 50);
        assert_eq!(report.bytes, 50 * 11);
        assert_eq!(sim.fifo_bytes(), 50 * 11);
        assert_eq!(sim.with_panel(|panel| panel.count(0x2C)), 50);
    }

    #[test]
    fn idle_session_stops_cleanly() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        let session = session(&sim, StopFlag::new());
        let report = session.shutdown().unwrap();
        assert_eq!(report.tasks, 0);
        assert_eq!(sim.fifo_bytes(), 0);
    }

    #[test]
    fn drop_joins_the_thread() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        {
            let mut session = session(&sim, StopFlag::new());
            session.producer().push(0x29, &[]).unwrap();
        }
        assert_eq!(sim.fifo_bytes(), 1);
    }

    #[test]
    fn producer_rejects_work_after_stop() {
        let sim = SimulatedPeripherals::new(DC_PIN);
        let stop = StopFlag::new();
        let mut session = session(&sim, stop.clone());
        stop.raise();
        assert_eq!(session.producer().push(0x2C, &[1, 2]), Err(QueueError::Closed));
        session.shutdown().unwrap();
    }
}
