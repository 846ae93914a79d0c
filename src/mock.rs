//! Scripted in-memory transport for exercising the stream engine without
//! hardware.

use crate::transfer::{IsoPacket, IsoTransfer, IsoTransport, Parked};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Slot {
    parts: Option<Parked>,
    submitted: bool,
    cancelled: bool,
}

#[derive(Default)]
struct Counters {
    live_transfers: AtomicIsize,
    event_calls: AtomicUsize,
}

/// Each scripted batch is delivered as one completed transfer.
#[derive(Default)]
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Vec<Vec<u8>>>>,
    current: Mutex<Option<Arc<Mutex<Slot>>>>,
    /// Transfers replaced by a newer allocation, possibly still submitted.
    stale: Mutex<Vec<Arc<Mutex<Slot>>>>,
    counters: Arc<Counters>,
    pub fail_alloc: AtomicBool,
    pub fail_submit: AtomicBool,
    pub fail_resubmit: AtomicBool,
    /// Cancellation never completes, as with a wedged host controller.
    pub ignore_cancel: Arc<AtomicBool>,
}

impl MockTransport {
    pub(crate) fn script(&self, batch: Vec<Vec<u8>>) {
        self.script.lock().unwrap().push_back(batch);
    }

    pub(crate) fn live_transfers(&self) -> isize {
        self.counters.live_transfers.load(Ordering::SeqCst)
    }

    pub(crate) fn event_calls(&self) -> usize {
        self.counters.event_calls.load(Ordering::SeqCst)
    }

    /// Complete every stale transfer that is still submitted with `batch`.
    /// Returns how many asked to be resubmitted.
    pub(crate) fn complete_stale(&self, batch: &[Vec<u8>]) -> usize {
        let mut resubmitted = 0;
        for slot in self.stale.lock().unwrap().iter() {
            let mut slot = slot.lock().unwrap();
            if !slot.submitted {
                continue;
            }
            let completion = &mut slot.parts.as_mut().unwrap().completion;
            let packets = batch.iter().map(|p| IsoPacket {
                completed: true,
                data: p,
            });
            let resubmit = completion.complete(true, packets);
            slot.submitted = resubmit;
            if resubmit {
                resubmitted += 1;
            }
        }
        resubmitted
    }

    fn idle() {
        std::thread::sleep(Duration::from_millis(1));
    }
}

impl IsoTransport for MockTransport {
    type Transfer = MockTransfer;

    fn alloc_transfer(&self, parts: Parked) -> Result<MockTransfer, Parked> {
        if self.fail_alloc.load(Ordering::SeqCst) {
            return Err(parts);
        }
        let slot = Arc::new(Mutex::new(Slot {
            parts: Some(parts),
            ..Default::default()
        }));
        if let Some(old) = self.current.lock().unwrap().replace(Arc::clone(&slot)) {
            self.stale.lock().unwrap().push(old);
        }
        self.counters.live_transfers.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransfer {
            slot,
            counters: Arc::clone(&self.counters),
            fail_submit: self.fail_submit.load(Ordering::SeqCst),
            ignore_cancel: Arc::clone(&self.ignore_cancel),
        })
    }

    fn handle_events(&self, _timeout: Duration) -> rusb::Result<()> {
        self.counters.event_calls.fetch_add(1, Ordering::SeqCst);

        let slot = self.current.lock().unwrap().clone();
        let slot = match slot {
            Some(slot) => slot,
            None => {
                Self::idle();
                return Ok(());
            }
        };

        let mut slot = slot.lock().unwrap();
        if !slot.submitted {
            drop(slot);
            Self::idle();
            return Ok(());
        }

        if slot.cancelled {
            let completion = &mut slot.parts.as_mut().unwrap().completion;
            if completion.complete(false, std::iter::empty()) {
                completion.resubmit_failed();
            }
            slot.submitted = false;
            return Ok(());
        }

        let batch = match self.script.lock().unwrap().pop_front() {
            Some(batch) => batch,
            None => {
                drop(slot);
                Self::idle();
                return Ok(());
            }
        };

        let fail_resubmit = self.fail_resubmit.load(Ordering::SeqCst);
        let completion = &mut slot.parts.as_mut().unwrap().completion;
        let packets = batch.iter().map(|p| IsoPacket {
            completed: true,
            data: p,
        });
        let resubmit = completion.complete(true, packets);
        if resubmit && fail_resubmit {
            completion.resubmit_failed();
        }
        slot.submitted = resubmit && !fail_resubmit;
        Ok(())
    }
}

pub(crate) struct MockTransfer {
    slot: Arc<Mutex<Slot>>,
    counters: Arc<Counters>,
    fail_submit: bool,
    ignore_cancel: Arc<AtomicBool>,
}

impl IsoTransfer for MockTransfer {
    fn submit(&mut self) -> rusb::Result<()> {
        if self.fail_submit {
            return Err(rusb::Error::Io);
        }
        let mut slot = self.slot.lock().unwrap();
        slot.submitted = true;
        slot.cancelled = false;
        Ok(())
    }

    fn cancel(&mut self) {
        if self.ignore_cancel.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.slot.lock().unwrap();
        if slot.submitted {
            slot.cancelled = true;
        }
    }

    fn release(self) -> Parked {
        self.counters.live_transfers.fetch_sub(1, Ordering::SeqCst);
        let parts = self.slot.lock().unwrap().parts.take();
        parts.expect("mock transfer released twice")
    }
}
