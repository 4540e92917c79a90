//! Stream poses from the source configured in the environment to stdout.
//!
//! Usage: POSEFEED_SOURCE=udp POSEFEED_UDP_PORT=50000 cargo run --example stream
//! Type `r` + Enter to recenter, `c` + Enter to ask the serial IMU to calibrate.
//! Press Ctrl+C to stop.

use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let config = match posefeed::SessionConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let session = match posefeed::Session::start(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to start {} session: {}", config.source, e);
            std::process::exit(1);
        }
    };

    println!("Source:   {}", session.kind());
    if let Some(addr) = session.local_addr() {
        println!("Listening on {}", addr);
    }
    println!();

    let input = session.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            match line.trim() {
                "r" => input.recenter(),
                "c" => input.request_device_calibration(),
                _ => continue,
            }
            println!("--- sent '{}' ---", line.trim());
        }
    });

    let start = Instant::now();
    let mut last_seq = 0;
    let mut last_report = Instant::now();

    // Poll like a host render loop would.
    while session.is_active() {
        std::thread::sleep(Duration::from_millis(10));

        for event in session.events().try_iter() {
            println!("event: {:?}", event);
        }

        let seq = session.store().sequence();
        if seq == last_seq {
            continue;
        }
        // Print roughly every 100th pose to avoid flooding the terminal
        let print = last_seq == 0 || seq / 100 != last_seq / 100;
        last_seq = seq;

        if let Some(p) = session.store().try_read() {
            if print {
                let q = p.orientation;
                println!(
                    "seq={:<8}  pos=[{:+.4}, {:+.4}, {:+.4}]  quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]",
                    seq, p.position.x, p.position.y, p.position.z, q.w, q.x, q.y, q.z,
                );
            }
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let elapsed = start.elapsed().as_secs_f64();
            println!("--- {} poses in {:.1}s ({:.1} Hz) ---", seq, elapsed, seq as f64 / elapsed);
            last_report = now;
        }
    }

    println!("\nSession ended: {:?}", session.state());
    session.stop();
}
