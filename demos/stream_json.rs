//! Stream poses as JSON lines for browser-side visualisation.
//!
//! One JSON object per line:
//!
//! {"x":0.021,"y":0.002,"z":0.028,"roll":5.2,"pitch":3.1,"yaw":1.4,"seq":1596}
//!
//! Usage: POSEFEED_SOURCE=serial POSEFEED_SERIAL_PORT=/dev/ttyACM0 cargo run --release --example stream_json

use std::io::{self, Write};
use std::time::Duration;

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
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start {} session: {}", config.source, e);
            std::process::exit(1);
        }
    };

    eprintln!("Streaming JSON from {} (Ctrl+C to stop)...", session.kind());

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let mut idle_timeouts: u32 = 0;

    loop {
        match session.store().wait_for_next_timeout(Duration::from_secs(2)) {
            Ok(p) => {
                idle_timeouts = 0;
                let [roll, pitch, yaw] = p.orientation.to_euler_deg();
                let _ = writeln!(
                    out,
                    "{{\"x\":{:.4},\"y\":{:.4},\"z\":{:.4},\"roll\":{:.1},\"pitch\":{:.1},\"yaw\":{:.1},\"seq\":{}}}",
                    p.position.x,
                    p.position.y,
                    p.position.z,
                    roll,
                    pitch,
                    yaw,
                    session.store().sequence(),
                );
                let _ = out.flush();
            }
            Err(posefeed::PosefeedError::Timeout) => {
                idle_timeouts += 1;
                eprintln!("No pose for 2s (timeout #{})", idle_timeouts);
                if idle_timeouts >= 15 {
                    eprintln!("Stopping after 30s without poses");
                    break;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    session.stop();
}
