//! Streaming engine: the recurring iso transfer, the completion handler that
//! reassembles frames, and the background event pump.
//!
//! The completion handler runs inside `handle_events` on whichever thread is
//! pumping, usually the `tc001-pump` thread. It never blocks and never
//! allocates; the user callback runs on that same thread, so a slow callback
//! stalls device servicing and costs packets.

use crate::assembler::{self, FrameAssembler, PacketOutcome};
use crate::config::Config;
use crate::protocol::{FRAME_BYTES, ISO_BUFFER_BYTES};
use crate::transfer::{IsoPacket, IsoTransfer, IsoTransport, Parked};
use crate::types::Frame;
use crate::{Result, Tc001Error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Frame handler invoked on the event thread. The frame is only valid for
/// the duration of the call.
pub type FrameCallback = Box<dyn FnMut(&Frame<'_>) + Send + 'static>;

/// Snapshot of the stream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Complete frames handed to the callback.
    pub frames: u64,
    /// End-of-frame markers seen with fewer bytes than a full frame.
    pub partial_frames: u64,
    /// Payload bytes dropped because they would overflow the frame buffer.
    pub overflow_bytes: u64,
    /// Packets skipped for a bad status or a truncated header.
    pub skipped_packets: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    partial_frames: AtomicU64,
    overflow_bytes: AtomicU64,
    skipped_packets: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: PacketOutcome) {
        let dropped = match outcome {
            PacketOutcome::Skipped => {
                self.skipped_packets.fetch_add(1, Ordering::Relaxed);
                0
            }
            PacketOutcome::Accumulated { dropped } => dropped,
            PacketOutcome::FrameComplete { dropped } => {
                self.frames.fetch_add(1, Ordering::Relaxed);
                dropped
            }
            PacketOutcome::FramePartial { dropped, .. } => {
                self.partial_frames.fetch_add(1, Ordering::Relaxed);
                dropped
            }
        };
        if dropped > 0 {
            self.overflow_bytes.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames: self.frames.load(Ordering::Relaxed),
            partial_frames: self.partial_frames.load(Ordering::Relaxed),
            overflow_bytes: self.overflow_bytes.load(Ordering::Relaxed),
            skipped_packets: self.skipped_packets.load(Ordering::Relaxed),
        }
    }
}

struct Snapshot {
    data: Box<[u8]>,
    timestamp_ns: u64,
    sequence: u32,
    captured: bool,
}

/// Copy of the most recently delivered frame, read by `pack`.
struct LatestFrame {
    slot: Mutex<Snapshot>,
}

impl LatestFrame {
    /// Never waits: if the caller holds the snapshot, this frame is skipped.
    fn store(&self, frame: &Frame<'_>) {
        if let Ok(mut snap) = self.slot.try_lock() {
            if snap.data.len() == frame.data.len() {
                snap.data.copy_from_slice(frame.data);
                snap.timestamp_ns = frame.timestamp_ns;
                snap.sequence = frame.sequence;
                snap.captured = true;
            }
        }
    }

    fn with<R>(&self, f: impl FnOnce(&Frame<'_>) -> R) -> Option<R> {
        let snap = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if !snap.captured {
            return None;
        }
        let frame = assembler::sensor_frame(&snap.data, snap.timestamp_ns, snap.sequence);
        Some(f(&frame))
    }
}

/// State shared by every transfer of one engine.
pub(crate) struct Shared {
    sequence: AtomicU32,
    counters: Counters,
    latest: LatestFrame,
    epoch: Instant,
}

/// Flags owned by one transfer. A leaked transfer keeps its own copy, so a
/// late completion can never touch the state of a later stream.
#[derive(Default)]
pub(crate) struct TransferState {
    running: AtomicBool,
    /// The transport currently owns the transfer.
    in_flight: AtomicBool,
}

/// The registered frame handler. The event thread only ever `try_lock`s it;
/// the engine clears it at stop so the handler is dropped even when the
/// transfer cannot be freed.
#[derive(Default)]
pub(crate) struct CallbackSlot {
    handler: Mutex<Option<FrameCallback>>,
}

impl CallbackSlot {
    fn set(&self, callback: Option<FrameCallback>) {
        let old = {
            let mut slot = self.handler.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *slot, callback)
        };
        drop(old);
    }
}

/// Per-transfer completion state, owned by the transfer while it exists.
pub(crate) struct Completion {
    assembler: FrameAssembler,
    callback: Arc<CallbackSlot>,
    state: Arc<TransferState>,
    shared: Arc<Shared>,
}

impl Completion {
    /// Handle one completed transfer. Returns whether it should be
    /// resubmitted; when it returns false the transfer is idle.
    pub(crate) fn complete<'a, I>(&mut self, transfer_ok: bool, packets: I) -> bool
    where
        I: IntoIterator<Item = IsoPacket<'a>>,
    {
        if transfer_ok && self.state.running.load(Ordering::Acquire) {
            for packet in packets {
                self.push(packet);
            }
        }

        if self.state.running.load(Ordering::Acquire) {
            true
        } else {
            self.state.in_flight.store(false, Ordering::Release);
            false
        }
    }

    /// Resubmission failed: stop the pump and mark the transfer idle.
    pub(crate) fn resubmit_failed(&mut self) {
        self.state.running.store(false, Ordering::Release);
        self.state.in_flight.store(false, Ordering::Release);
    }

    fn push(&mut self, packet: IsoPacket<'_>) {
        let shared = &self.shared;
        if !packet.completed {
            shared.counters.record(PacketOutcome::Skipped);
            return;
        }

        let state = &self.state;
        let slot = &self.callback;
        let outcome = self.assembler.push_packet(packet.data, |data| {
            let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            let timestamp_ns = shared.epoch.elapsed().as_nanos() as u64;
            let frame = assembler::sensor_frame(data, timestamp_ns, sequence);
            shared.latest.store(&frame);

            // Contended only while the engine is clearing the handler.
            if let Ok(mut handler) = slot.handler.try_lock() {
                if let Some(callback) = handler.as_mut() {
                    if catch_unwind(AssertUnwindSafe(|| callback(&frame))).is_err() {
                        log::error!("Frame callback panicked; halting stream");
                        state.running.store(false, Ordering::Release);
                        *handler = None;
                    }
                }
            }
        });
        shared.counters.record(outcome);
    }
}

struct Active<X> {
    transfer: X,
    state: Arc<TransferState>,
    callback: Arc<CallbackSlot>,
    pump: JoinHandle<()>,
}

/// Owns the buffers, the transfer and the pump thread of one device.
pub(crate) struct StreamEngine<T: IsoTransport> {
    transport: Arc<T>,
    config: Config,
    shared: Arc<Shared>,
    parked: Option<Parked>,
    active: Option<Active<T::Transfer>>,
}

impl<T: IsoTransport> StreamEngine<T> {
    /// Allocate the iso receive buffer, the frame-assembly buffer and the
    /// latest-frame snapshot.
    pub(crate) fn new(transport: Arc<T>, config: Config) -> Result<Self> {
        let shared = Arc::new(Shared {
            sequence: AtomicU32::new(0),
            counters: Counters::default(),
            latest: LatestFrame {
                slot: Mutex::new(Snapshot {
                    data: alloc_zeroed(FRAME_BYTES, "frame snapshot")?,
                    timestamp_ns: 0,
                    sequence: 0,
                    captured: false,
                }),
            },
            epoch: Instant::now(),
        });
        let parked = fresh_parts(&shared)?;
        Ok(Self {
            transport,
            config: config.sanitized(),
            shared,
            parked: Some(parked),
            active: None,
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |a| a.state.running.load(Ordering::Acquire))
    }

    pub(crate) fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot()
    }

    /// Run `f` over the most recently delivered frame, if any.
    pub(crate) fn with_latest<R>(&self, f: impl FnOnce(&Frame<'_>) -> R) -> Option<R> {
        self.shared.latest.with(f)
    }

    pub(crate) fn start(&mut self, callback: FrameCallback) -> Result<()> {
        if self.is_running() {
            return Err(Tc001Error::State("stream already running"));
        }
        if self.active.is_some() {
            log::warn!("Previous stream halted on its own; reaping it");
            self.stop();
        }

        let parts = match self.parked.take() {
            Some(parts) => parts,
            None => fresh_parts(&self.shared)?,
        };
        let state = Arc::clone(&parts.completion.state);
        let slot = Arc::clone(&parts.completion.callback);
        slot.set(Some(callback));

        let mut transfer = match self.transport.alloc_transfer(parts) {
            Ok(transfer) => transfer,
            Err(parts) => {
                slot.set(None);
                self.parked = Some(parts);
                return Err(Tc001Error::Alloc("iso transfer"));
            }
        };

        state.in_flight.store(true, Ordering::Release);
        if let Err(e) = transfer.submit() {
            state.in_flight.store(false, Ordering::Release);
            slot.set(None);
            self.reclaim(transfer, &state);
            return Err(Tc001Error::usb("submit transfer", e));
        }
        state.running.store(true, Ordering::Release);

        let transport = Arc::clone(&self.transport);
        let pump_state = Arc::clone(&state);
        let interval = self.config.pump_interval;
        let spawned = std::thread::Builder::new()
            .name("tc001-pump".into())
            .spawn(move || pump_loop(&*transport, &pump_state, interval));

        match spawned {
            Ok(pump) => {
                self.active = Some(Active {
                    transfer,
                    state,
                    callback: slot,
                    pump,
                });
                log::info!("Streaming started");
                Ok(())
            }
            Err(e) => {
                state.running.store(false, Ordering::Release);
                self.drain(&mut transfer, &state);
                slot.set(None);
                self.reclaim(transfer, &state);
                Err(Tc001Error::Internal(format!("failed to spawn event pump: {}", e)))
            }
        }
    }

    /// Stop streaming. No-op when idle. On return the pump thread has exited,
    /// the callback is dropped and the transfer is freed.
    pub(crate) fn stop(&mut self) {
        let mut active = match self.active.take() {
            Some(active) => active,
            None => return,
        };

        active.state.running.store(false, Ordering::Release);
        self.drain(&mut active.transfer, &active.state);
        active.callback.set(None);
        self.reclaim(active.transfer, &active.state);
        if active.pump.join().is_err() {
            log::warn!("Event pump thread panicked");
        }

        let stats = self.stats();
        log::info!(
            "Streaming stopped: frames={} partial={} overflow_bytes={} skipped_packets={}",
            stats.frames,
            stats.partial_frames,
            stats.overflow_bytes,
            stats.skipped_packets
        );
    }

    /// Cancel and pump events until the transfer reports idle, bounded by
    /// the configured drain budget.
    fn drain(&self, transfer: &mut T::Transfer, state: &TransferState) {
        transfer.cancel();
        for _ in 0..self.config.drain_iterations {
            if !state.in_flight.load(Ordering::Acquire) {
                break;
            }
            match self.transport.handle_events(self.config.drain_interval) {
                Ok(()) | Err(rusb::Error::Interrupted) => {}
                Err(e) => log::debug!("Event handling during drain: {}", e),
            }
        }
    }

    fn reclaim(&mut self, transfer: T::Transfer, state: &TransferState) {
        if state.in_flight.load(Ordering::Acquire) {
            // Freeing it now would hand libusb a dangling transfer. The next
            // start allocates fresh parts with their own state.
            log::warn!("Transfer still in flight after drain; leaking it");
            std::mem::forget(transfer);
            return;
        }
        self.parked = Some(transfer.release());
    }
}

impl<T: IsoTransport> Drop for StreamEngine<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fresh_parts(shared: &Arc<Shared>) -> Result<Parked> {
    Ok(Parked {
        iso_buffer: alloc_zeroed(ISO_BUFFER_BYTES, "iso buffer")?,
        completion: Box::new(Completion {
            assembler: FrameAssembler::new(alloc_zeroed(FRAME_BYTES, "frame buffer")?),
            callback: Arc::new(CallbackSlot::default()),
            state: Arc::new(TransferState::default()),
            shared: Arc::clone(shared),
        }),
    })
}

pub(crate) fn alloc_zeroed(len: usize, what: &'static str) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Tc001Error::Alloc(what))?;
    buf.resize(len, 0);
    Ok(buf.into_boxed_slice())
}

/// Pump transport events while the transfer's running flag is set.
fn pump_loop<T: IsoTransport>(transport: &T, state: &TransferState, interval: Duration) {
    log::debug!("Event pump started");
    while state.running.load(Ordering::Acquire) {
        match transport.handle_events(interval) {
            Ok(()) | Err(rusb::Error::Interrupted) => {}
            Err(e) => {
                log::warn!("Error handling USB events: {}", e);
                std::thread::sleep(interval);
            }
        }
    }
    log::debug!("Event pump stopped");
}
