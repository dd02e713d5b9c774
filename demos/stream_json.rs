//! Stream the fused pen pose as JSON lines, one object per tick:
//!
//! {"x":-0.250,"y":0.750,"z":-0.400,"qx":0.0000,"qy":0.0000,"qz":0.0000,"qw":1.0000,"draw":false,"menu":false,"calibrate":false}
//!
//! Usage: cargo run --release --example stream_json

use std::io::{self, Write};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(16);

fn main() {
    env_logger::init();

    let mut tracker = match pentrack::TrackerConfig::from_env()
        .and_then(|config| pentrack::Tracker::open(&config))
    {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to start tracker: {}", e);
            std::process::exit(1);
        }
    };

    // Tell the pen we are going away while the ports are still open.
    tracker.register_teardown_hook(|ctx| {
        if let Err(e) = ctx.send_line(pentrack::ChannelKind::Orientation, "STOP") {
            eprintln!("Teardown message failed: {}", e);
        }
    });

    eprintln!("Streaming JSON (Ctrl+C to stop)...");

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    loop {
        let tick = tracker.tick();
        let p = tick.world_position;
        let q = tick.world_orientation;
        let written = writeln!(
            out,
            "{{\"x\":{:.3},\"y\":{:.3},\"z\":{:.3},\"qx\":{:.4},\"qy\":{:.4},\"qz\":{:.4},\"qw\":{:.4},\"draw\":{},\"menu\":{},\"calibrate\":{}}}",
            p.x, p.y, p.z,
            q.x, q.y, q.z, q.w,
            tick.draw(),
            tick.menu_toggle(),
            tick.calibrate(),
        )
        .and_then(|_| out.flush());

        // Downstream closed the pipe.
        if written.is_err() {
            break;
        }
        std::thread::sleep(TICK);
    }

    tracker.deactivate();
}
