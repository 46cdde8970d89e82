use colored::Colorize;
use std::io::{self, Read};
use std::net::TcpListener;

use crate::dispatch::decision::STIM_THRESHOLD;

// -----------------------------------------------------------------------------
// AUDIT MONITOR
// -----------------------------------------------------------------------------
//
// Console viewer for the audit outlet: listens for the dispatcher to
// connect and prints one line per accepted event, flagging
// stimulation-worthy values in red.

pub fn run(addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    println!("audit monitor listening on {}", addr);

    let (mut stream, peer) = listener.accept()?;
    println!("dispatcher connected from {}", peer);

    let mut buffer = [0u8; 4];
    let mut count: u64 = 0;

    loop {
        match stream.read_exact(&mut buffer) {
            Ok(()) => {
                count += 1;
                let value = i32::from_be_bytes(buffer);

                let alert = if value > STIM_THRESHOLD {
                    "STIM ".red()
                } else {
                    "     ".white()
                };

                // To ensure |repeat| doesn't overflow on junk values
                let bar_len = (value.max(0) as usize).min(255) / 4;
                let bar = "|".repeat(bar_len);
                let bar = if value > STIM_THRESHOLD {
                    bar.red()
                } else {
                    bar.white()
                };

                println!("{}{:>6}  {:>5}  {}", alert, count, value, bar);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                println!("dispatcher disconnected after {} events", count);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
