//! # tc001 - Rust driver for the TC001 USB thermal camera module
//!
//! Talks to the sensor through libusb (rusb). Provides:
//! - Device discovery and the vendor start-up handshake
//! - Isochronous streaming with frame reassembly on a background event thread
//! - Min/max AGC to 8-bit previews
//! - Fusion payloads: raw frame, statistics, thumbnail and calibration in one block
//! - C FFI for integration with C/C++ consumers
//!
//! ## Quick Start
//! ```no_run
//! use std::time::Duration;
//!
//! let mut session = tc001::Session::open(0, 0).unwrap();
//! let stream = session.start_stream(4).unwrap();
//! for _ in 0..25 {
//!     let frame = stream.recv_timeout(Duration::from_secs(1)).unwrap();
//!     println!("frame {} at {} ns", frame.sequence, frame.timestamp_ns);
//! }
//! session.stop();
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod config;
pub mod handshake;
pub mod agc;
pub mod assembler;
mod transfer;
pub mod stream;
pub mod payload;
pub mod queue;
pub mod session;
pub mod ffi;

#[cfg(test)]
mod mock;

pub use config::Config;
pub use error::{Tc001Error, Tc001Status};
pub use payload::{PayloadHeader, PayloadPacker};
pub use queue::{FrameStream, OwnedFrame};
pub use session::{list_devices, Session};
pub use stream::{FrameCallback, StreamStats};
pub use types::*;

/// Result type alias for tc001 operations.
pub type Result<T> = std::result::Result<T, Tc001Error>;
