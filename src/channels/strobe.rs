use serialport::SerialPort;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use super::ConfirmationLine;
use crate::error::Error;

// STROBE LINE -----------------------------------------------------------------

/// Hardware confirmation line: two raw bytes per event, the cycling index
/// followed by a zero, giving an oscilloscope-visible edge independent of
/// the software command path.
pub struct StrobeLine<W: Write> {
    line: W,
}

impl<W: Write> StrobeLine<W> {
    pub fn new(line: W) -> Self {
        Self { line }
    }
}

/// Open the trigger box on a serial port.
pub fn open_serial(port: &str, baud_rate: u32) -> Result<StrobeLine<Box<dyn SerialPort>>, Error> {
    let line = serialport::new(port, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
        .map_err(|e| Error::ConfirmationLine(e.into()))?;
    Ok(StrobeLine::new(line))
}

impl<W: Write> ConfirmationLine for StrobeLine<W> {
    fn strobe(&mut self, index: u8) -> Result<(), Error> {
        self.line
            .write_all(&[index])
            .and_then(|_| self.line.write_all(&[0]))
            .and_then(|_| self.line.flush())
            .map_err(Error::ConfirmationLine)
    }

    fn close(&mut self) {
        let _ = self.line.flush();
    }
}

// LATENCY PROBE ---------------------------------------------------------------

/// Toggle the line as fast as it will go for `duration` and report the
/// number of up/down cycles, for verifying write latency against an
/// oscilloscope capture. A full cycle measured ~520 us on the original
/// Arduino trigger box.
pub fn latency_probe<W: Write>(line: &mut W, duration: Duration) -> io::Result<u64> {
    let start = Instant::now();
    let mut cycles = 0u64;
    while start.elapsed() < duration {
        line.write_all(b"u\n")?;
        line.write_all(b"d\n")?;
        cycles += 1;
    }
    line.flush()?;
    Ok(cycles)
}
