use std::cell::RefCell;
use std::ffi::{c_char, CString};

/// Status codes shared with the C ABI. Every fallible operation maps onto one.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tc001Status {
    Ok = 0,
    Param = -1,
    NoDevice = -2,
    Usb = -3,
    Alloc = -4,
    State = -5,
    Internal = -6,
}

/// Errors that can occur when driving the TC001 module.
#[derive(Debug, thiserror::Error)]
pub enum Tc001Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    #[error("device not found (VID={vid:04X} PID={pid:04X})")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("{context} failed: {source}")]
    Usb {
        context: &'static str,
        #[source]
        source: rusb::Error,
    },

    #[error("allocation failed: {0}")]
    Alloc(&'static str),

    #[error("invalid state: {0}")]
    State(&'static str),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("frame stream stopped")]
    StreamStopped,

    #[error("timeout waiting for a frame")]
    Timeout,

    #[error("malformed payload: {0}")]
    InvalidPayload(&'static str),
}

impl Tc001Error {
    pub(crate) fn usb(context: &'static str, source: rusb::Error) -> Self {
        Tc001Error::Usb { context, source }
    }

    /// Collapse this error onto the C status code taxonomy.
    pub fn status(&self) -> Tc001Status {
        match self {
            Tc001Error::InvalidParam(_) | Tc001Error::InvalidPayload(_) => Tc001Status::Param,
            Tc001Error::DeviceNotFound { .. } => Tc001Status::NoDevice,
            Tc001Error::Usb { .. } => Tc001Status::Usb,
            Tc001Error::Alloc(_) => Tc001Status::Alloc,
            Tc001Error::State(_) | Tc001Error::StreamStopped => Tc001Status::State,
            Tc001Error::Internal(_) | Tc001Error::Timeout => Tc001Status::Internal,
        }
    }
}

thread_local! {
    /// Last error message for C consumers, one per calling thread.
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record `err` as the calling thread's last error.
pub(crate) fn set_last_error(err: &Tc001Error) {
    let bytes: Vec<u8> = err.to_string().into_bytes().into_iter().filter(|&b| b != 0).collect();
    let message = CString::new(bytes).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// The calling thread's last error, or null. Valid until the next error
/// recorded on the same thread.
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(message) => message.as_ptr(),
        None => std::ptr::null(),
    })
}
