//! Print the fused pen pose and button events to stdout.
//!
//! Ports and options come from `PENTRACK_*` environment variables, e.g.
//!   PENTRACK_XY_PORT=/dev/rfcomm0 PENTRACK_Z_PORT=/dev/rfcomm1 \
//!   PENTRACK_ORIENTATION_PORT=/dev/rfcomm2 cargo run --example stream
//! Press Ctrl+C to stop.

use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(16);

fn main() {
    env_logger::init();

    let config = match pentrack::TrackerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut tracker = match pentrack::Tracker::open(&config) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to start tracker: {}", e);
            std::process::exit(1);
        }
    };

    println!("Streaming pose (Ctrl+C to stop)...");

    let start = Instant::now();
    let mut ticks: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        let out = tracker.tick();
        ticks += 1;

        if out.menu_toggle() {
            println!("--- menu ---");
        }
        if out.calibrate() {
            println!("--- calibrated ---");
        }

        // Print every ~30th tick to avoid flooding the terminal
        if ticks % 30 == 1 || out.draw() {
            let p = out.world_position;
            let q = out.world_orientation;
            println!(
                "pos=[{:+.3}, {:+.3}, {:+.3}]  quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]  draw={}",
                p.x, p.y, p.z, q.x, q.y, q.z, q.w,
                out.draw(),
            );
        }

        // Channel health every 3 seconds
        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let status = tracker.channel_status();
            if let Some(stats) = tracker.channel_stats() {
                for (kind, s) in stats.iter() {
                    println!(
                        "--- {:<11} {:?}: {} lines, {} superseded, {} faults ---",
                        kind,
                        status.get(kind),
                        s.lines,
                        s.superseded,
                        s.faults
                    );
                }
            }
            println!("--- {} ticks in {:.1}s ---", ticks, start.elapsed().as_secs_f64());
            last_report = now;
        }

        std::thread::sleep(TICK);
    }
}
