//! C FFI layer for tc001.
//!
//! Provides an opaque handle-based API for C/C++ consumers. Every entry point
//! checks its pointer arguments before any side effect. The generated C
//! header is written to `include/tc001.h` by cbindgen.

use crate::agc;
use crate::error::{self, Tc001Status};
use crate::payload;
use crate::session::Session;
use crate::types::{CalibrationSet, PixelFormat, TemperatureModel};
use crate::Tc001Error;
use std::ffi::{c_char, c_int, c_void};

/// Opaque session handle for C consumers.
pub struct Tc001Handle(Session);

/// Frame view passed to the C callback. `data` is only valid during the call.
#[repr(C)]
pub struct Tc001Frame {
    pub width: c_int,
    pub height: c_int,
    /// Bytes per row.
    pub stride: c_int,
    /// Nanoseconds since the session was opened; 0 if unknown.
    pub timestamp_ns: i64,
    pub format: PixelFormat,
    pub data: *const u8,
}

/// Frame callback invoked on the event thread.
pub type Tc001FrameCallback = Option<unsafe extern "C" fn(frame: *const Tc001Frame, user: *mut c_void)>;

/// Caller-owned context pointer handed back to the callback untouched.
struct UserContext(*mut c_void);

// SAFETY: the pointer is never dereferenced here; thread-safety of whatever
// it points to is the caller's contract.
unsafe impl Send for UserContext {}

impl UserContext {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// Copy `msg` into a caller buffer, truncated and always NUL-terminated.
/// Leaves the buffer untouched when it is null or `cap` is 0.
unsafe fn write_diag(err: *mut c_char, cap: usize, msg: &str) {
    if err.is_null() || cap == 0 {
        return;
    }
    let bytes = msg.as_bytes();
    let len = bytes.len().min(cap - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), err as *mut u8, len);
    *err.add(len) = 0;
}

unsafe fn fail(e: Tc001Error, err: *mut c_char, cap: usize) -> Tc001Status {
    write_diag(err, cap, &e.to_string());
    error::set_last_error(&e);
    e.status()
}

/// Open the first device matching `vid`/`pid` (0 selects the TC001 ids) and
/// run the start-up handshake.
///
/// # Safety
/// `out` must be a valid pointer to receive the handle. `err` must point to
/// at least `errcap` writable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn tc001_open(
    out: *mut *mut Tc001Handle,
    vid: u16,
    pid: u16,
    err: *mut c_char,
    errcap: usize,
) -> Tc001Status {
    if out.is_null() {
        return fail(Tc001Error::InvalidParam("null output handle"), err, errcap);
    }
    *out = std::ptr::null_mut();

    match Session::open(vid, pid) {
        Ok(session) => {
            *out = Box::into_raw(Box::new(Tc001Handle(session)));
            Tc001Status::Ok
        }
        Err(e) => fail(e, err, errcap),
    }
}

/// Stop streaming, release the device and free the handle.
///
/// # Safety
/// `h` must be a pointer returned by `tc001_open`, or null.
#[no_mangle]
pub unsafe extern "C" fn tc001_close(h: *mut Tc001Handle) {
    if !h.is_null() {
        drop(Box::from_raw(h));
    }
}

/// Start streaming; `cb` is invoked with `user` once per complete frame.
///
/// # Safety
/// `h` must be a valid handle, or null. `err` as for `tc001_open`.
#[no_mangle]
pub unsafe extern "C" fn tc001_start(
    h: *mut Tc001Handle,
    cb: Tc001FrameCallback,
    user: *mut c_void,
    err: *mut c_char,
    errcap: usize,
) -> Tc001Status {
    if h.is_null() {
        return fail(Tc001Error::InvalidParam("null handle"), err, errcap);
    }
    let cb = match cb {
        Some(cb) => cb,
        None => return fail(Tc001Error::InvalidParam("null callback"), err, errcap),
    };
    let session = &mut (*h).0;
    let user = UserContext(user);

    let result = session.start(move |frame| {
        let view = Tc001Frame {
            width: frame.width as c_int,
            height: frame.height as c_int,
            stride: frame.stride as c_int,
            timestamp_ns: frame.timestamp_ns as i64,
            format: frame.format,
            data: frame.data.as_ptr(),
        };
        // SAFETY: `view` and its data outlive the call; the callback
        // contract forbids keeping the pointer.
        unsafe { cb(&view, user.get()) };
    });

    match result {
        Ok(()) => Tc001Status::Ok,
        Err(e) => fail(e, err, errcap),
    }
}

/// Stop streaming. On return the event thread has exited.
///
/// # Safety
/// `h` must be a valid handle, or null.
#[no_mangle]
pub unsafe extern "C" fn tc001_stop(h: *mut Tc001Handle) {
    if let Some(handle) = h.as_mut() {
        handle.0.stop();
    }
}

/// Write the frame width and height. Either output may be null.
///
/// # Safety
/// `w` and `hgt` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc001_get_frame_dims(h: *mut Tc001Handle, w: *mut c_int, hgt: *mut c_int) {
    let _ = h;
    if let Some(w) = w.as_mut() {
        *w = crate::protocol::FRAME_WIDTH as c_int;
    }
    if let Some(hgt) = hgt.as_mut() {
        *hgt = crate::protocol::FRAME_HEIGHT as c_int;
    }
}

/// Min/max AGC of `count` raw values into 8-bit. No-op on null or
/// non-positive `count`.
///
/// # Safety
/// `input` and `out` must each point to `count` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn tc001_u16_to_u8(input: *const u16, count: c_int, out: *mut u8) {
    if input.is_null() || out.is_null() || count <= 0 {
        return;
    }
    let raw = std::slice::from_raw_parts(input, count as usize);
    let out = std::slice::from_raw_parts_mut(out, count as usize);
    agc::normalize(raw, out);
}

/// Upper bound on the bytes `tc001_pack_payload` writes. 0 for negative
/// dimensions.
#[no_mangle]
pub extern "C" fn tc001_max_payload_bytes(w: c_int, h: c_int, thumb_w: c_int, thumb_h: c_int) -> usize {
    if w < 0 || h < 0 || thumb_w < 0 || thumb_h < 0 {
        return 0;
    }
    payload::max_payload_bytes(w as usize, h as usize, thumb_w as usize, thumb_h as usize)
}

/// Pack the most recent frame into `dst`. Returns the bytes written, or 0
/// on failure (see `tc001_last_error`).
///
/// # Safety
/// `h` must be a valid handle, or null. `dst` must point to `dst_cap`
/// writable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn tc001_pack_payload(
    h: *mut Tc001Handle,
    dst: *mut c_void,
    dst_cap: usize,
    thumb_w: c_int,
    thumb_h: c_int,
    use_agc: c_int,
) -> usize {
    if h.is_null() || dst.is_null() || dst_cap == 0 || thumb_w <= 0 || thumb_h <= 0 {
        error::set_last_error(&Tc001Error::InvalidParam("invalid pack arguments"));
        return 0;
    }
    let session = &mut (*h).0;
    let dst = std::slice::from_raw_parts_mut(dst as *mut u8, dst_cap);

    match session.pack(dst, thumb_w as usize, thumb_h as usize, use_agc != 0) {
        Ok(written) => written,
        Err(e) => {
            error::set_last_error(&e);
            0
        }
    }
}

/// Store the calibration stamped into subsequent payloads.
///
/// # Safety
/// `h` and `c` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc001_set_calibration(h: *mut Tc001Handle, c: *const CalibrationSet) {
    if let (Some(handle), Some(calibration)) = (h.as_mut(), c.as_ref()) {
        handle.0.set_calibration(*calibration);
    }
}

/// Store the temperature model stamped into subsequent payloads.
///
/// # Safety
/// `h` and `t` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc001_set_temp_model(h: *mut Tc001Handle, t: *const TemperatureModel) {
    if let (Some(handle), Some(model)) = (h.as_mut(), t.as_ref()) {
        handle.0.set_temperature_model(*model);
    }
}

/// Get the calling thread's last error message. Returns NULL if no error.
/// The returned pointer is valid until the next failing tc001 call on the
/// same thread.
#[no_mangle]
pub extern "C" fn tc001_last_error() -> *const c_char {
    error::last_error_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_diag_truncates_and_terminates() {
        let mut buf = [0x7f as c_char; 8];
        unsafe { write_diag(buf.as_mut_ptr(), buf.len(), "claim interface failed") };
        let msg = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(msg.to_str().unwrap(), "claim i");
        assert_eq!(buf[7], 0);
    }

    #[test]
    fn test_diag_zero_capacity_untouched() {
        let mut buf = [0x7f as c_char; 4];
        unsafe {
            write_diag(buf.as_mut_ptr(), 0, "anything");
            write_diag(std::ptr::null_mut(), 16, "anything");
        }
        assert!(buf.iter().all(|&c| c == 0x7f));
    }

    #[test]
    fn test_null_arguments_are_param_errors() {
        let mut buf = [0 as c_char; 64];
        let status = unsafe { tc001_open(std::ptr::null_mut(), 0, 0, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(status, Tc001Status::Param);
        let msg = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert!(msg.to_str().unwrap().contains("null output handle"));

        let status = unsafe {
            tc001_start(std::ptr::null_mut(), None, std::ptr::null_mut(), std::ptr::null_mut(), 0)
        };
        assert_eq!(status, Tc001Status::Param);

        let mut dst = [0u8; 16];
        let written = unsafe {
            tc001_pack_payload(std::ptr::null_mut(), dst.as_mut_ptr() as *mut c_void, dst.len(), 4, 4, 1)
        };
        assert_eq!(written, 0);
        assert!(!tc001_last_error().is_null());

        unsafe {
            tc001_close(std::ptr::null_mut());
            tc001_stop(std::ptr::null_mut());
            tc001_set_calibration(std::ptr::null_mut(), std::ptr::null());
        }
    }

    #[test]
    fn test_frame_dims_and_agc() {
        let (mut w, mut h) = (0, 0);
        unsafe { tc001_get_frame_dims(std::ptr::null_mut(), &mut w, &mut h) };
        assert_eq!((w, h), (256, 192));

        let raw = [1000u16, 1500, 2000];
        let mut out = [0u8; 3];
        unsafe { tc001_u16_to_u8(raw.as_ptr(), 3, out.as_mut_ptr()) };
        assert_eq!(out, [0, 128, 255]);

        let mut untouched = [7u8; 3];
        unsafe { tc001_u16_to_u8(raw.as_ptr(), 0, untouched.as_mut_ptr()) };
        assert_eq!(untouched, [7; 3]);
    }

    #[test]
    fn test_max_payload_bytes() {
        assert_eq!(tc001_max_payload_bytes(256, 192, 64, 48), 1273 + 98304 + 6 + 3072);
        assert_eq!(tc001_max_payload_bytes(-1, 192, 64, 48), 0);
    }
}
