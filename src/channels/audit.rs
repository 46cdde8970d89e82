use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::time::Duration;

use super::AuditSink;
use crate::config::AuditConfig;
use crate::dispatch::decision::TriggerEvent;
use crate::error::Error;

// TCP OUTLET ------------------------------------------------------------------

/// Outbound audit stream: one big-endian i32 value per accepted event,
/// pushed to whoever is listening (see `local::monitor`).
///
/// Writes carry a short timeout so a stalled consumer surfaces as a
/// publish error instead of parking the dispatch loop.
pub struct TcpAuditOutlet {
    stream: TcpStream,
}

const OUTLET_WRITE_TIMEOUT: Duration = Duration::from_millis(5);

impl TcpAuditOutlet {
    pub fn connect(addr: &str) -> Result<Self, Error> {
        let stream =
            TcpStream::connect(addr).map_err(|e| Error::AuditPublish(e.to_string()))?;
        stream
            .set_write_timeout(Some(OUTLET_WRITE_TIMEOUT))
            .map_err(|e| Error::AuditPublish(e.to_string()))?;
        Ok(Self { stream })
    }
}

impl AuditSink for TcpAuditOutlet {
    fn publish(&mut self, event: &TriggerEvent) -> Result<(), Error> {
        self.stream
            .write_all(&event.value.to_be_bytes())
            .map_err(|e| Error::AuditPublish(e.to_string()))
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

// CSV LOG ---------------------------------------------------------------------

/// File-based audit trail for offline verification.
pub struct CsvAuditLog {
    writer: csv::Writer<File>,
}

impl CsvAuditLog {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| Error::AuditPublish(e.to_string()))?;
            }
        }
        let mut writer =
            csv::Writer::from_path(&path).map_err(|e| Error::AuditPublish(e.to_string()))?;
        writer
            .write_record(["time", "value", "sequence_index", "stim"])
            .map_err(|e| Error::AuditPublish(e.to_string()))?;
        Ok(Self { writer })
    }
}

impl AuditSink for CsvAuditLog {
    fn publish(&mut self, event: &TriggerEvent) -> Result<(), Error> {
        self.writer
            .write_record([
                Utc::now().to_rfc3339(),
                event.value.to_string(),
                event.sequence_index.to_string(),
                event.stimulation_worthy().to_string(),
            ])
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .map_err(|e| Error::AuditPublish(e.to_string()))
    }

    fn close(&mut self) {
        let _ = self.writer.flush();
    }
}

// COMPOSITE PUBLISHER ---------------------------------------------------------

/// Fans each event out to whichever sinks the config enables. Publishing
/// keeps going past a failed sink so one bad file handle cannot silence the
/// other trail.
pub struct AuditPublisher {
    outlet: Option<TcpAuditOutlet>,
    csv: Option<CsvAuditLog>,
}

impl AuditPublisher {
    pub fn from_config(config: &AuditConfig) -> Result<Self, Error> {
        let outlet = match &config.outlet_addr {
            Some(addr) => Some(TcpAuditOutlet::connect(addr)?),
            None => None,
        };
        let csv = match &config.csv_path {
            Some(path) => Some(CsvAuditLog::create(path)?),
            None => None,
        };
        Ok(Self { outlet, csv })
    }
}

impl AuditSink for AuditPublisher {
    fn publish(&mut self, event: &TriggerEvent) -> Result<(), Error> {
        let mut first_err = None;
        if let Some(outlet) = &mut self.outlet {
            if let Err(e) = outlet.publish(event) {
                first_err.get_or_insert(e);
            }
        }
        if let Some(csv) = &mut self.csv {
            if let Err(e) = csv.publish(event) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if let Some(outlet) = &mut self.outlet {
            outlet.close();
        }
        if let Some(csv) = &mut self.csv {
            csv.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn event(value: i32, index: u8) -> TriggerEvent {
        TriggerEvent {
            value,
            sequence_index: index,
            timestamp_us: 0,
        }
    }

    #[test]
    fn csv_log_records_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        let mut log = CsvAuditLog::create(&path).unwrap();
        log.publish(&event(200, 1)).unwrap();
        log.publish(&event(5, 2)).unwrap();
        log.close();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "time,value,sequence_index,stim");
        assert!(lines[1].ends_with(",200,1,true"));
        assert!(lines[2].ends_with(",5,2,false"));
    }

    #[test]
    fn tcp_outlet_pushes_one_value_per_event() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut outlet = TcpAuditOutlet::connect(&addr).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        outlet.publish(&event(200, 1)).unwrap();
        outlet.close();

        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, 200i32.to_be_bytes());
    }

    #[test]
    fn stalled_consumer_surfaces_error_instead_of_parking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut outlet = TcpAuditOutlet::connect(&addr).unwrap();
        // Accept the connection but never read from it, so the socket
        // buffers eventually fill.
        let (_peer, _) = listener.accept().unwrap();

        let mut saw_error = false;
        for i in 0..16_000_000 {
            if let Err(e) = outlet.publish(&event(i, 1)) {
                assert!(matches!(e, Error::AuditPublish(_)));
                saw_error = true;
                break;
            }
        }
        assert!(saw_error, "publish kept succeeding with a stalled consumer");
    }

    #[test]
    fn empty_config_publishes_nowhere() {
        let mut publisher = AuditPublisher::from_config(&AuditConfig::default()).unwrap();
        publisher.publish(&event(1, 1)).unwrap();
        publisher.close();
    }
}
