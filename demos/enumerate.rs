//! List connected TC001 modules.
//!
//! Usage: cargo run --example enumerate [VID PID]   (hex, e.g. 0bda 5830)

fn parse_hex(arg: Option<String>) -> u16 {
    arg.and_then(|s| u16::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0)
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let vid = parse_hex(args.next());
    let pid = parse_hex(args.next());

    match tc001::list_devices(vid, pid) {
        Ok(devices) => {
            println!("Found {} TC001 device(s):", devices.len());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] {:04X}:{:04X}  Bus={} Addr={}",
                    i, dev.vendor_id, dev.product_id, dev.bus_number, dev.address
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
