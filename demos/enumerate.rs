//! List serial ports the pen's channels could be attached to.

fn main() {
    env_logger::init();

    match pentrack::transport::available_ports() {
        Ok(ports) => {
            println!("Found {} serial port(s):", ports.len());
            for (i, port) in ports.iter().enumerate() {
                println!("  [{}] {}", i, port);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
