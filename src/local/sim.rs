use log::{info, warn};
use rand::Rng;
use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

// -----------------------------------------------------------------------------
// SIMULATED MARKER SERVER
// -----------------------------------------------------------------------------
//
// Stands in for the real marker stream during bench testing: serves the
// same length-prefixed big-endian i32 frames the dispatcher ingests, with
// repeated values, occasional jumps (some above the stimulation cutoff)
// and the odd multi-value glitch frame the decision engine must ignore.

const TICK: Duration = Duration::from_millis(50);
const JUMP_PERCENT: u32 = 10;
const GLITCH_PERCENT: u32 = 3;

pub fn run(addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!("marker simulator listening on {}", addr);

    for stream in listener.incoming() {
        let stream = stream?;
        thread::spawn(move || {
            if let Err(e) = feed_markers(stream) {
                warn!("marker feed ended: {}", e);
            }
        });
    }

    Ok(())
}

struct MarkerGen {
    value: i32,
}

impl MarkerGen {
    fn new<R: Rng>(rng: &mut R) -> Self {
        Self {
            value: rng.gen_range(1..=255),
        }
    }

    // Jumps and glitches roll independently, so glitch frames also land on
    // repeated values and exercise the multi-value ignore path downstream.
    fn next<R: Rng>(&mut self, rng: &mut R) -> Vec<i32> {
        if rng.gen_range(0..100) < JUMP_PERCENT {
            self.value = rng.gen_range(1..=255);
        }
        if rng.gen_range(0..100) < GLITCH_PERCENT {
            vec![self.value, self.value]
        } else {
            vec![self.value]
        }
    }
}

fn feed_markers(mut stream: TcpStream) -> io::Result<()> {
    let mut rng = rand::thread_rng();
    let mut markers = MarkerGen::new(&mut rng);

    loop {
        let frame = markers.next(&mut rng);
        write_frame(&mut stream, &frame)?;
        thread::sleep(TICK);
    }
}

fn write_frame(stream: &mut TcpStream, values: &[i32]) -> io::Result<()> {
    stream.write_all(&[values.len() as u8])?;
    for value in values {
        stream.write_all(&value.to_be_bytes())?;
    }
    stream.flush()
}
