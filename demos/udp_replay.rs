//! Send synthetic tracking datagrams to a posefeed UDP session.
//!
//! Plays the role of the companion tracking process: a slow circle in the
//! horizontal plane with a matching yaw, at ~90 Hz.
//!
//! Usage: cargo run --example udp_replay [host:port]
//! Default target is 127.0.0.1:50000.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", posefeed::protocol::UDP_PORT));

    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to bind sender socket: {}", e);
            std::process::exit(1);
        }
    };

    println!("Sending to {} (Ctrl+C to stop)...", target);

    let start = Instant::now();
    let mut sent: u64 = 0;

    loop {
        let t = start.elapsed().as_secs_f64();
        let angle = t * 0.5;
        let (x, y, z) = (0.3 * angle.cos(), 0.0, 0.3 * angle.sin());
        let half = angle / 2.0;
        let (qw, qx, qy, qz) = (half.cos(), 0.0, half.sin(), 0.0);

        // Wire order: z x y qw qz qx qy
        let datagram = format!(
            "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            z, x, y, qw, qz, qx, qy
        );

        if let Err(e) = socket.send_to(datagram.as_bytes(), &target) {
            eprintln!("Send failed: {}", e);
            break;
        }
        sent += 1;
        if sent % 270 == 0 {
            println!("--- {} datagrams in {:.1}s ---", sent, t);
        }

        std::thread::sleep(Duration::from_micros(11_111));
    }
}
