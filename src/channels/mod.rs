use crate::dispatch::decision::TriggerEvent;
use crate::error::Error;

pub mod audit;
pub mod stim;
pub mod strobe;

// CHANNEL TRAITS --------------------------------------------------------------
//
// The dispatch loop is generic over these three seams so tests can swap the
// real socket/serial/file handles for byte-capturing fakes.

/// Persistent command path to the stimulator. Fire-and-forget: no response
/// is read, since waiting would reintroduce the latency the dispatcher
/// exists to avoid.
pub trait CommandChannel {
    fn send_stimulation_command(&mut self) -> Result<(), Error>;
    fn close(&mut self);
}

/// Hardware strobe line producing an observable edge per accepted event.
pub trait ConfirmationLine {
    fn strobe(&mut self, index: u8) -> Result<(), Error>;
    fn close(&mut self);
}

/// Outbound audit trail. Publish failures must never stop stimulation
/// delivery; the loop logs them and moves on.
pub trait AuditSink {
    fn publish(&mut self, event: &TriggerEvent) -> Result<(), Error>;
    fn close(&mut self);
}
