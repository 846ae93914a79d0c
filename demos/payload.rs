//! Capture one frame and pack it into a fusion payload file.
//!
//! Usage: cargo run --example payload [OUTPUT]   (default: payload.bin)

use std::time::{Duration, Instant};

const THUMB_W: usize = 64;
const THUMB_H: usize = 48;

fn main() {
    env_logger::init();

    let output = std::env::args().nth(1).unwrap_or_else(|| "payload.bin".into());

    let mut session = match tc001::Session::open(0, 0) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    session.set_temperature_model(tc001::TemperatureModel {
        valid: true,
        emissivity: 0.95,
        ambient_c: 22.0,
        gain_k_per_raw: 1.0 / 64.0,
        offset_k: 0.0,
        model_id: 1,
    });

    if let Err(e) = session.start(|_frame| {}) {
        eprintln!("Failed to start streaming: {}", e);
        std::process::exit(1);
    }

    let (w, h, _) = session.frame_dims();
    let mut buf = vec![0u8; tc001::payload::max_payload_bytes(w as usize, h as usize, THUMB_W, THUMB_H)];
    let deadline = Instant::now() + Duration::from_secs(5);
    let written = loop {
        match session.pack(&mut buf, THUMB_W, THUMB_H, true) {
            Ok(n) => break n,
            Err(tc001::Tc001Error::State(_)) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                eprintln!("Pack failed: {}", e);
                std::process::exit(1);
            }
        }
    };
    session.stop();

    let header = match tc001::PayloadHeader::parse(&buf[..written]) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Packed payload did not parse: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "frame {} {}x{}: raw [{}, {}] p10/p50/p90 = {}/{}/{} bad={}",
        header.frame_id,
        header.width,
        header.height,
        header.stats.raw_min,
        header.stats.raw_max,
        header.stats.p10,
        header.stats.p50,
        header.stats.p90,
        header.stats.bad_pixels
    );

    if let Err(e) = std::fs::write(&output, &buf[..written]) {
        eprintln!("Failed to write {}: {}", output, e);
        std::process::exit(1);
    }
    println!("Wrote {} bytes to {}", written, output);
}
