//! Isochronous transport seam and its libusb implementation.
//!
//! rusb has no safe asynchronous transfer API, so the recurring iso transfer
//! is driven through `rusb::ffi` (libusb1-sys). The completion callback runs
//! inside whichever thread is currently in `handle_events`.

use crate::protocol::{ISO_ENDPOINT, ISO_TIMEOUT_MS, NUM_PACKETS, PACKET_SIZE};
use crate::stream::Completion;
use rusb::{ffi, UsbContext};
use std::ffi::{c_int, c_uint, c_void};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::time::Duration;

/// One packet of a completed isochronous transfer.
#[derive(Debug, Clone, Copy)]
pub struct IsoPacket<'a> {
    /// Per-packet status was "completed".
    pub completed: bool,
    /// Captured bytes (`actual_length` of the packet).
    pub data: &'a [u8],
}

/// Buffers and completion state that outlive any single transfer object.
pub struct Parked {
    pub(crate) iso_buffer: Box<[u8]>,
    pub(crate) completion: Box<Completion>,
}

/// A transport able to run one recurring isochronous IN transfer.
///
/// Not nameable outside the crate; `Session` is generic over it only so the
/// engine can run against an in-memory transport.
pub trait IsoTransport: Send + Sync + 'static {
    type Transfer: IsoTransfer;

    /// Allocate and fill a transfer. Hands the parts back on failure.
    fn alloc_transfer(&self, parts: Parked) -> Result<Self::Transfer, Parked>;

    /// Process pending transport events, waiting at most `timeout`.
    fn handle_events(&self, timeout: Duration) -> rusb::Result<()>;
}

/// An allocated transfer. The transport may only hold it while it is in
/// flight; `release` must not be called before the completion reported idle.
pub trait IsoTransfer: Send {
    fn submit(&mut self) -> rusb::Result<()>;
    fn cancel(&mut self);
    fn release(self) -> Parked;
}

/// libusb context plus the claimed device handle.
pub struct UsbTransport {
    // Field order matters: the handle must close before the context exits.
    handle: rusb::DeviceHandle<rusb::Context>,
    context: rusb::Context,
    interface: u8,
}

impl UsbTransport {
    pub(crate) fn new(
        context: rusb::Context,
        handle: rusb::DeviceHandle<rusb::Context>,
        interface: u8,
    ) -> Self {
        Self {
            handle,
            context,
            interface,
        }
    }

    pub(crate) fn handle_mut(&mut self) -> &mut rusb::DeviceHandle<rusb::Context> {
        &mut self.handle
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        match self.handle.release_interface(self.interface) {
            Ok(()) | Err(rusb::Error::NoDevice) | Err(rusb::Error::NotFound) => {}
            Err(e) => log::warn!("Release interface {}: {}", self.interface, e),
        }
    }
}

impl IsoTransport for UsbTransport {
    type Transfer = LibusbIsoTransfer;

    fn alloc_transfer(&self, parts: Parked) -> Result<LibusbIsoTransfer, Parked> {
        // SAFETY: plain allocation; null is handled below.
        let raw = unsafe { ffi::libusb_alloc_transfer(NUM_PACKETS as c_int) };
        let raw = match NonNull::new(raw) {
            Some(raw) => raw,
            None => return Err(parts),
        };

        let Parked {
            iso_buffer,
            completion,
        } = parts;
        let len = iso_buffer.len();
        let iso_buffer = Box::into_raw(iso_buffer);
        let completion = Box::into_raw(completion);

        // SAFETY: `raw` was allocated with NUM_PACKETS descriptors, the buffer
        // holds NUM_PACKETS * PACKET_SIZE bytes, and both boxes stay alive
        // until `release`/`drop` reclaims them.
        unsafe {
            ffi::libusb_fill_iso_transfer(
                raw.as_ptr(),
                self.handle.as_raw(),
                ISO_ENDPOINT,
                iso_buffer as *mut u8,
                len as c_int,
                NUM_PACKETS as c_int,
                iso_callback,
                completion as *mut c_void,
                ISO_TIMEOUT_MS as c_uint,
            );
            ffi::libusb_set_iso_packet_lengths(raw.as_ptr(), PACKET_SIZE as c_uint);
        }

        Ok(LibusbIsoTransfer {
            raw,
            iso_buffer,
            completion,
        })
    }

    fn handle_events(&self, timeout: Duration) -> rusb::Result<()> {
        self.context.handle_events(Some(timeout))
    }
}

/// A libusb iso transfer owning its buffer and completion state.
pub struct LibusbIsoTransfer {
    raw: NonNull<ffi::libusb_transfer>,
    iso_buffer: *mut [u8],
    completion: *mut Completion,
}

// SAFETY: the raw pointers are only dereferenced by libusb's event handling
// (serialised by libusb) or after the transfer is idle.
unsafe impl Send for LibusbIsoTransfer {}

impl IsoTransfer for LibusbIsoTransfer {
    fn submit(&mut self) -> rusb::Result<()> {
        // SAFETY: the transfer is filled and idle.
        let rc = unsafe { ffi::libusb_submit_transfer(self.raw.as_ptr()) };
        if rc < 0 {
            Err(libusb_error(rc))
        } else {
            Ok(())
        }
    }

    fn cancel(&mut self) {
        // NOT_FOUND just means it already completed.
        // SAFETY: the transfer is allocated; cancelling an idle one is allowed.
        unsafe {
            ffi::libusb_cancel_transfer(self.raw.as_ptr());
        }
    }

    fn release(self) -> Parked {
        let this = ManuallyDrop::new(self);
        // SAFETY: the completion has reported idle, so libusb no longer
        // references the transfer, its buffer or its user data.
        unsafe {
            ffi::libusb_free_transfer(this.raw.as_ptr());
            Parked {
                iso_buffer: Box::from_raw(this.iso_buffer),
                completion: Box::from_raw(this.completion),
            }
        }
    }
}

impl Drop for LibusbIsoTransfer {
    fn drop(&mut self) {
        // SAFETY: same contract as `release`.
        unsafe {
            ffi::libusb_free_transfer(self.raw.as_ptr());
            drop(Box::from_raw(self.iso_buffer));
            drop(Box::from_raw(self.completion));
        }
    }
}

/// libusb completion callback. Must not block or allocate.
extern "system" fn iso_callback(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb passes back the transfer filled in `alloc_transfer`;
    // `user_data` is the boxed Completion it owns for the transfer's lifetime,
    // and iso packets are laid out at PACKET_SIZE strides in `buffer`.
    unsafe {
        let completion = &mut *((*transfer).user_data as *mut Completion);
        let transfer_ok = (*transfer).status == ffi::constants::LIBUSB_TRANSFER_COMPLETED;
        let count = ((*transfer).num_iso_packets.max(0) as usize).min(NUM_PACKETS);
        let descriptors = std::ptr::addr_of!((*transfer).iso_packet_desc)
            .cast::<ffi::libusb_iso_packet_descriptor>();
        let base = (*transfer).buffer as *const u8;

        let packets = (0..count).map(|i| {
            let desc = &*descriptors.add(i);
            let len = (desc.actual_length as usize).min(PACKET_SIZE);
            IsoPacket {
                completed: desc.status == ffi::constants::LIBUSB_TRANSFER_COMPLETED,
                data: std::slice::from_raw_parts(base.add(i * PACKET_SIZE), len),
            }
        });

        if completion.complete(transfer_ok, packets) && ffi::libusb_submit_transfer(transfer) < 0 {
            completion.resubmit_failed();
        }
    }
}

fn libusb_error(code: c_int) -> rusb::Error {
    use ffi::constants::*;
    match code {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}
