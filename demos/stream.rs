//! Stream thermal frames and print a per-frame summary.
//!
//! Usage: cargo run --example stream [SECONDS]

use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let mut session = match tc001::Session::open(0, 0) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    let (w, h, stride) = session.frame_dims();
    println!("Frame: {}x{} stride={} bytes", w, h, stride);

    let stream = match session.start_stream(4) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start streaming: {}", e);
            std::process::exit(1);
        }
    };

    println!("Streaming for {}s...", seconds);

    let start = Instant::now();
    let mut count: u64 = 0;
    let mut preview = vec![0u8; (w * h) as usize];

    while start.elapsed() < Duration::from_secs(seconds) {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(frame) => {
                count += 1;
                let raw: Vec<u16> = frame.as_frame().raw_values().collect();
                tc001::agc::normalize(&raw, &mut preview);

                // Print every ~25th frame to avoid flooding the terminal
                if count % 25 == 1 {
                    let (lo, hi) = raw
                        .iter()
                        .fold((u16::MAX, 0u16), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                    let center = preview[(h / 2 * w + w / 2) as usize];
                    println!(
                        "#{:<6} ts={:<14} raw=[{}, {}] center_u8={}",
                        frame.sequence, frame.timestamp_ns, lo, hi, center
                    );
                }
            }
            Err(tc001::Tc001Error::Timeout) => {
                eprintln!("Timeout waiting for frames");
            }
            Err(e) => {
                eprintln!("Stream error: {}", e);
                break;
            }
        }
    }

    session.stop();
    let elapsed = start.elapsed().as_secs_f64();
    let stats = session.stats();
    println!(
        "{} frames in {:.1}s ({:.1} Hz); partial={} overflow_bytes={} queue_dropped={}",
        count,
        elapsed,
        count as f64 / elapsed,
        stats.partial_frames,
        stats.overflow_bytes,
        stream.dropped()
    );
}
