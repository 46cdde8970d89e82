use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::{Shutdown, TcpStream};

use super::CommandChannel;
use crate::error::Error;

// STIM PARAMETERS -------------------------------------------------------------

/// Pulse parameters for the STARTSTIM command.
///
/// Defaults describe the single biphasic pulse used in the sleep
/// experiments: cathodic first phase on channel 10272, return on 10273.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StimParams {
    pub stim_channel: u32,
    pub first_phase_delay_ms: f64,
    pub first_phase_ampl_ma: f64,
    pub first_phase_width_ms: f64,
    pub second_phase_delay_ms: f64,
    pub second_phase_ampl_ma: f64,
    pub second_phase_width_ms: f64,
    pub freq_hz: f64,
    pub duration_s: f64,
    pub return_channel: u32,
}

impl Default for StimParams {
    fn default() -> Self {
        Self {
            stim_channel: 10272,
            first_phase_delay_ms: 0.0,
            first_phase_ampl_ma: -1.0,
            first_phase_width_ms: 0.36,
            second_phase_delay_ms: 0.0,
            second_phase_ampl_ma: 1.0,
            second_phase_width_ms: 0.36,
            freq_hz: 130.0,
            duration_s: 0.006,
            return_channel: 10273,
        }
    }
}

impl StimParams {
    /// Render the pipe-delimited ASCII payload the stimulator API expects.
    pub fn command(&self) -> String {
        format!(
            "STARTSTIM|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.stim_channel,
            self.first_phase_delay_ms,
            self.first_phase_ampl_ma,
            self.first_phase_width_ms,
            self.second_phase_delay_ms,
            self.second_phase_ampl_ma,
            self.second_phase_width_ms,
            self.freq_hz,
            self.duration_s,
            self.return_channel,
        )
    }
}

// COMMAND CHANNEL -------------------------------------------------------------

/// Persistent TCP connection to the stimulator command API. The payload is
/// rendered once at connect time; the hot path only writes bytes.
pub struct StimCommandChannel {
    stream: TcpStream,
    payload: Vec<u8>,
}

impl StimCommandChannel {
    pub fn connect(addr: &str, params: &StimParams) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).map_err(Error::CommandChannel)?;
        stream.set_nodelay(true).map_err(Error::CommandChannel)?;
        Ok(Self {
            stream,
            payload: params.command().into_bytes(),
        })
    }
}

impl CommandChannel for StimCommandChannel {
    fn send_stimulation_command(&mut self) -> Result<(), Error> {
        self.stream
            .write_all(&self.payload)
            .map_err(Error::CommandChannel)
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
