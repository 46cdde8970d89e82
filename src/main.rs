use log::error;
use std::sync::atomic::Ordering;
use std::time::Duration;

use stim_dispatch::channels::strobe;
use stim_dispatch::{config, dispatch, local, Error};

const DEFAULT_CONFIG: &str = "config/stim_dispatch.yaml";
const DEFAULT_MARKER_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MONITOR_ADDR: &str = "127.0.0.1:9090";

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        Some("run") => run(args.get(2).map_or(DEFAULT_CONFIG, String::as_str)),
        Some("sim") => local::sim::run(args.get(2).map_or(DEFAULT_MARKER_ADDR, String::as_str))
            .map_err(|e| e.to_string()),
        Some("monitor") => {
            local::monitor::run(args.get(2).map_or(DEFAULT_MONITOR_ADDR, String::as_str))
                .map_err(|e| e.to_string())
        }
        Some("probe") => match args.get(2) {
            Some(port) => probe(port),
            None => Err("probe requires a serial port argument".to_string()),
        },
        _ => {
            eprintln!("usage: stim-dispatch <run [config]|sim [addr]|monitor [addr]|probe <port>>");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(config_path: &str) -> Result<(), String> {
    let config = config::load_config(config_path).map_err(|e| e.to_string())?;
    let dispatch = dispatch::connect(&config).map_err(|e| e.to_string())?;
    let (handle, stop) = dispatch::spawn(dispatch);

    println!("dispatch loop running; press Enter to stop");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    stop.store(true, Ordering::Relaxed);
    match handle.join() {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err("dispatch thread panicked".to_string()),
    }
}

fn probe(port: &str) -> Result<(), String> {
    let mut line = serialport::new(port, 9600)
        .timeout(Duration::from_millis(10))
        .open()
        .map_err(|e| Error::ConfirmationLine(e.into()).to_string())?;

    let duration = Duration::from_secs(10);
    println!("toggling {} for {:?}...", port, duration);
    let cycles = strobe::latency_probe(&mut line, duration)
        .map_err(|e| Error::ConfirmationLine(e).to_string())?;

    println!(
        "{} cycles in {:?} ({:.1} us per cycle)",
        cycles,
        duration,
        duration.as_micros() as f64 / cycles as f64
    );
    Ok(())
}
