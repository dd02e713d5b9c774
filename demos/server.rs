//! Pen pose → WebSocket broadcast.
//!
//! Ticks the tracker at ~60 Hz and sends every connected client one JSON
//! object per tick:
//!   {"x":..,"y":..,"z":..,"qx":..,"qy":..,"qz":..,"qw":..,"draw":..,"menu":..,"calibrate":..}
//!
//! Usage:
//!   cargo run --release --example server
//!   Connect to ws://localhost:8080

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tungstenite::Message;

const PORT: u16 = 8080;
const TICK: Duration = Duration::from_millis(16);

type WsClient = Arc<Mutex<tungstenite::WebSocket<TcpStream>>>;
type Clients = Arc<Mutex<Vec<WsClient>>>;

fn main() {
    env_logger::init();

    let config = match pentrack::TrackerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[PEN] Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let clients: Clients = Arc::new(Mutex::new(Vec::new()));

    let tick_clients = clients.clone();
    let running = Arc::new(AtomicBool::new(true));
    let tick_running = running.clone();

    let tick_thread = match std::thread::Builder::new()
        .name("pentrack-tick".into())
        .spawn(move || tick_loop(config, tick_clients, tick_running))
    {
        Ok(t) => t,
        Err(e) => {
            eprintln!("[PEN] Failed to spawn tick thread: {}", e);
            std::process::exit(1);
        }
    };

    let listener = TcpListener::bind(format!("0.0.0.0:{}", PORT)).unwrap_or_else(|e| {
        eprintln!("Failed to bind port {}: {}", PORT, e);
        std::process::exit(1);
    });

    eprintln!("[WS] Listening on ws://localhost:{}", PORT);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[TCP] accept error: {}", e);
                continue;
            }
        };
        let clients = clients.clone();
        std::thread::spawn(move || handle_websocket(stream, clients));
    }

    running.store(false, Ordering::Relaxed);
    let _ = tick_thread.join();
}

/// Complete the handshake and add the client to the broadcast list.
///
/// The tick thread is the sole writer; a failed send removes the client.
fn handle_websocket(stream: TcpStream, clients: Clients) {
    // Write timeout prevents the tick thread from blocking on a slow client
    stream.set_write_timeout(Some(Duration::from_secs(2))).ok();
    stream.set_nodelay(true).ok();

    let ws = match tungstenite::accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("[WS] handshake error: {}", e);
            return;
        }
    };

    if let Ok(mut list) = clients.lock() {
        list.push(Arc::new(Mutex::new(ws)));
        eprintln!("[WS] Client connected ({} total)", list.len());
    }
}

fn tick_loop(config: pentrack::TrackerConfig, clients: Clients, running: Arc<AtomicBool>) {
    let mut tracker = match pentrack::Tracker::open(&config) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("[PEN] Failed to start tracker: {}", e);
            return;
        }
    };

    eprintln!("[PEN] Broadcasting pose to WebSocket clients...");

    let mut ticks: u64 = 0;
    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) {
        let out = tracker.tick();
        ticks += 1;

        let p = out.world_position;
        let q = out.world_orientation;
        let json = format!(
            "{{\"x\":{:.4},\"y\":{:.4},\"z\":{:.4},\"qx\":{:.4},\"qy\":{:.4},\"qz\":{:.4},\"qw\":{:.4},\"draw\":{},\"menu\":{},\"calibrate\":{}}}",
            p.x, p.y, p.z,
            q.x, q.y, q.z, q.w,
            out.draw(),
            out.menu_toggle(),
            out.calibrate(),
        );

        let msg = Message::Text(json);
        if let Ok(mut list) = clients.lock() {
            list.retain(|ws_arc| match ws_arc.lock() {
                Ok(mut ws) => ws.send(msg.clone()).is_ok(),
                Err(_) => false,
            });
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(5) {
            let clients_count = clients.lock().map(|l| l.len()).unwrap_or(0);
            let status = tracker.channel_status();
            eprintln!(
                "[PEN] {} ticks, {} client(s), xy={:?} z={:?} orientation={:?}",
                ticks,
                clients_count,
                status.xy,
                status.z,
                status.orientation
            );
            ticks = 0;
            last_report = now;
        }

        std::thread::sleep(TICK);
    }

    tracker.deactivate();
}
