use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, TcpStream};

use crate::error::Error;

// SAMPLE COMPONENT ------------------------------------------------------------

/// One observation from the marker stream. Arrival order is implicit in the
/// order samples come out of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub values: Vec<i32>,
}

impl Sample {
    pub fn new(values: Vec<i32>) -> Self {
        Self { values }
    }

    /// The sample's single value, if and only if it is single-valued.
    /// Multi-valued samples are never actionable.
    pub fn scalar(&self) -> Option<i32> {
        match self.values.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }
}

// SOURCE COMPONENT ------------------------------------------------------------

/// A non-blocking handle onto the inbound marker stream.
pub trait MarkerSource {
    /// Drain everything the source has buffered right now into `out`.
    /// Must not block beyond a bounded, small amount of work; a dead source
    /// surfaces `Error::SourceUnavailable` instead of hanging.
    fn pull(&mut self, out: &mut Vec<Sample>) -> Result<(), Error>;

    fn close(&mut self);
}

/// Marker source over a TCP stream.
///
/// Wire format per frame: one length byte, then that many big-endian i32
/// values. Partial frames are kept across pulls until the rest arrives.
pub struct TcpMarkerSource {
    stream: TcpStream,
    raw: Vec<u8>,
}

impl TcpMarkerSource {
    pub fn connect(addr: &str) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).map_err(Error::SourceUnavailable)?;
        stream
            .set_nonblocking(true)
            .map_err(Error::SourceUnavailable)?;
        Ok(Self {
            stream,
            raw: Vec::new(),
        })
    }
}

impl MarkerSource for TcpMarkerSource {
    fn pull(&mut self, out: &mut Vec<Sample>) -> Result<(), Error> {
        let mut chunk = [0u8; 512];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(Error::SourceUnavailable(io::Error::new(
                        ErrorKind::ConnectionReset,
                        "marker stream closed by peer",
                    )))
                }
                Ok(n) => self.raw.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::SourceUnavailable(e)),
            }
        }
        parse_frames(&mut self.raw, out);
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Split complete frames off the front of `raw` into samples, leaving any
/// trailing partial frame in place.
pub fn parse_frames(raw: &mut Vec<u8>, out: &mut Vec<Sample>) {
    let mut consumed = 0;
    while raw.len() - consumed >= 1 {
        let n_values = raw[consumed] as usize;
        let frame_len = 1 + 4 * n_values;
        if raw.len() - consumed < frame_len {
            break;
        }
        let mut values = Vec::with_capacity(n_values);
        for i in 0..n_values {
            let at = consumed + 1 + 4 * i;
            let bytes = [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]];
            values.push(i32::from_be_bytes(bytes));
        }
        out.push(Sample::new(values));
        consumed += frame_len;
    }
    raw.drain(..consumed);
}

// WATCHER COMPONENT -----------------------------------------------------------

/// Buffered adapter over a `MarkerSource` with "has new data" semantics.
///
/// `poll` refreshes the local ring of recent samples; the new-data flag
/// stays set until `clear_new_flag`, so a sample rejected by the decision
/// engine is re-evaluated (or superseded) on the next poll.
pub struct MarkerWatcher<S: MarkerSource> {
    source: S,
    buffer: VecDeque<Sample>,
    capacity: usize,
    n_new: usize,
    scratch: Vec<Sample>,
}

impl<S: MarkerSource> MarkerWatcher<S> {
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            n_new: 0,
            scratch: Vec::new(),
        }
    }

    /// Non-blocking refresh; returns whether unconsumed new data exists.
    pub fn poll(&mut self) -> Result<bool, Error> {
        self.scratch.clear();
        self.source.pull(&mut self.scratch)?;
        for sample in self.scratch.drain(..) {
            if self.buffer.len() == self.capacity {
                self.buffer.pop_front();
            }
            self.buffer.push_back(sample);
            self.n_new += 1;
        }
        Ok(self.n_new > 0)
    }

    /// Most recently buffered sample.
    pub fn latest(&self) -> Result<&Sample, Error> {
        self.buffer.back().ok_or(Error::NoDataAvailable)
    }

    pub fn clear_new_flag(&mut self) {
        self.n_new = 0;
    }

    pub fn close(&mut self) {
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Duration;

    struct ScriptedSource {
        batches: VecDeque<Vec<Sample>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<i32>>) -> Self {
            Self {
                batches: batches
                    .into_iter()
                    .map(|b| b.into_iter().map(|v| Sample::new(vec![v])).collect())
                    .collect(),
            }
        }
    }

    impl MarkerSource for ScriptedSource {
        fn pull(&mut self, out: &mut Vec<Sample>) -> Result<(), Error> {
            if let Some(batch) = self.batches.pop_front() {
                out.extend(batch);
            }
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn latest_before_any_data_is_no_data() {
        let mut watcher = MarkerWatcher::new(ScriptedSource::new(vec![]), 8);
        assert!(!watcher.poll().unwrap());
        assert!(matches!(watcher.latest(), Err(Error::NoDataAvailable)));
    }

    #[test]
    fn new_flag_persists_until_cleared() {
        let mut watcher = MarkerWatcher::new(ScriptedSource::new(vec![vec![5], vec![]]), 8);
        assert!(watcher.poll().unwrap());
        // No new arrivals, but the previous batch was never consumed.
        assert!(watcher.poll().unwrap());
        assert_eq!(watcher.latest().unwrap().scalar(), Some(5));
        watcher.clear_new_flag();
        assert!(!watcher.poll().unwrap());
    }

    #[test]
    fn latest_tracks_most_recent_sample() {
        let mut watcher = MarkerWatcher::new(ScriptedSource::new(vec![vec![1, 2, 3]]), 2);
        assert!(watcher.poll().unwrap());
        assert_eq!(watcher.latest().unwrap().scalar(), Some(3));
    }

    #[test]
    fn parse_frames_handles_partials_and_multivalue() {
        let mut raw = Vec::new();
        raw.push(1u8);
        raw.extend_from_slice(&200i32.to_be_bytes());
        raw.push(2u8);
        raw.extend_from_slice(&7i32.to_be_bytes());
        raw.extend_from_slice(&8i32.to_be_bytes());
        raw.push(1u8);
        raw.extend_from_slice(&9i32.to_be_bytes()[..2]); // partial frame

        let mut out = Vec::new();
        parse_frames(&mut raw, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].scalar(), Some(200));
        assert_eq!(out[1].scalar(), None);
        assert_eq!(out[1].values, vec![7, 8]);
        assert_eq!(raw.len(), 3); // length byte + 2 bytes of the partial value
    }

    #[test]
    fn tcp_source_pulls_frames_and_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut source = TcpMarkerSource::connect(&addr.to_string()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut frame = vec![1u8];
        frame.extend_from_slice(&42i32.to_be_bytes());
        peer.write_all(&frame).unwrap();
        peer.flush().unwrap();

        let mut out = Vec::new();
        for _ in 0..50 {
            source.pull(&mut out).unwrap();
            if !out.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].scalar(), Some(42));

        drop(peer);
        let mut err = None;
        for _ in 0..50 {
            match source.pull(&mut out) {
                Ok(()) => std::thread::sleep(Duration::from_millis(2)),
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        assert!(matches!(err, Some(Error::SourceUnavailable(_))));
    }

    #[test]
    fn scalar_rejects_multivalue() {
        assert_eq!(Sample::new(vec![5]).scalar(), Some(5));
        assert_eq!(Sample::new(vec![5, 6]).scalar(), None);
        assert_eq!(Sample::new(vec![]).scalar(), None);
    }
}
