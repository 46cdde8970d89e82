use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::channels::audit::AuditPublisher;
use crate::channels::stim::StimCommandChannel;
use crate::channels::strobe::{self, StrobeLine};
use crate::channels::{AuditSink, CommandChannel, ConfirmationLine};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{Config, DispatchConfig};
use crate::error::Error;
use crate::ingest::{MarkerSource, MarkerWatcher, TcpMarkerSource};

pub mod decision;

use decision::DecisionEngine;

// DISPATCH LOOP ---------------------------------------------------------------

/// Fraction of the poll interval spent settling after a fire, so the same
/// physical event cannot re-trigger on the immediately following poll.
const SETTLE_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// The closed-loop core: polls the marker watcher at a fixed cadence, runs
/// each fresh sample through the decision engine, and dispatches accepted
/// events to the stimulator, the audit trail and the hardware strobe line.
///
/// Single-writer by construction: the only externally mutated state is the
/// stop flag, read once at the top of each iteration. The loop exclusively
/// owns all four channel handles and releases them in reverse acquisition
/// order on every exit path, stop and fatal error alike.
pub struct DispatchLoop<S, C, H, A, K>
where
    S: MarkerSource,
    C: CommandChannel,
    H: ConfirmationLine,
    A: AuditSink,
    K: Clock,
{
    watcher: MarkerWatcher<S>,
    command: C,
    audit: A,
    confirm: H,
    clock: K,
    engine: DecisionEngine,
    poll_interval_us: u64,
    settle_us: u64,
    phase: LoopPhase,
}

/// The production instantiation: TCP markers in, TCP stimulator commands
/// out, serial strobe line, composite audit publisher, real clock.
pub type StandardDispatchLoop = DispatchLoop<
    TcpMarkerSource,
    StimCommandChannel,
    StrobeLine<Box<dyn serialport::SerialPort>>,
    AuditPublisher,
    MonotonicClock,
>;

/// Acquire all four channel handles in the fixed startup order: command
/// socket first (polling must never start without a live command path),
/// then the marker source, the audit sink, and finally the trigger box.
/// Handles acquired before a failure are dropped, which closes them.
pub fn connect(config: &Config) -> Result<StandardDispatchLoop, Error> {
    info!("connecting stimulator command API at {}", config.stimulator.addr);
    let command = StimCommandChannel::connect(&config.stimulator.addr, &config.stimulator.params)?;

    info!("connecting marker stream at {}", config.marker_stream.addr);
    let source = TcpMarkerSource::connect(&config.marker_stream.addr)?;
    let watcher = MarkerWatcher::new(source, config.marker_stream.buffer_size);

    let audit = AuditPublisher::from_config(&config.audit)?;

    info!("opening trigger box on {}", config.trigger_box.port);
    let confirm = strobe::open_serial(&config.trigger_box.port, config.trigger_box.baud_rate)?;

    let clock = MonotonicClock::new(config.dispatch.wait_strategy);
    Ok(DispatchLoop::new(
        watcher,
        command,
        audit,
        confirm,
        clock,
        &config.dispatch,
    ))
}

impl<S, C, H, A, K> DispatchLoop<S, C, H, A, K>
where
    S: MarkerSource,
    C: CommandChannel,
    H: ConfirmationLine,
    A: AuditSink,
    K: Clock,
{
    pub fn new(
        watcher: MarkerWatcher<S>,
        command: C,
        audit: A,
        confirm: H,
        clock: K,
        config: &DispatchConfig,
    ) -> Self {
        let engine = DecisionEngine::new(config.grace_period_us(), clock.now_us());
        Self {
            watcher,
            command,
            audit,
            confirm,
            clock,
            engine,
            poll_interval_us: config.poll_interval_us,
            settle_us: (config.poll_interval_us as f64 * SETTLE_FRACTION) as u64,
            phase: LoopPhase::Starting,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Run until the stop flag is raised or a fatal channel error occurs.
    /// All channel handles are released before this returns.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), Error> {
        self.phase = LoopPhase::Running;
        info!(
            "dispatch loop running (poll {} us, settle {} us)",
            self.poll_interval_us, self.settle_us
        );

        let result = self.run_cycles(stop);

        self.release();
        match &result {
            Ok(()) => {
                self.phase = LoopPhase::Stopped;
                info!("dispatch loop stopped");
            }
            Err(e) => {
                self.phase = LoopPhase::Failed;
                error!("dispatch loop failed: {}", e);
            }
        }
        result
    }

    fn run_cycles(&mut self, stop: &AtomicBool) -> Result<(), Error> {
        let mut next_due = self.clock.now_us() + self.poll_interval_us;
        while !stop.load(Ordering::Relaxed) {
            let now = self.clock.now_us();
            if now < next_due {
                self.clock.wait_us(next_due - now);
                continue;
            }
            next_due = now + self.poll_interval_us;

            if self.cycle(now)? {
                self.clock.wait_us(self.settle_us);
            }
        }
        self.phase = LoopPhase::Stopping;
        Ok(())
    }

    /// One Ingest -> Decide -> Dispatch pass. Returns whether an event
    /// fired. Dispatch order within a cycle is stimulation command, audit
    /// publish, strobe: the command must precede the strobe (stimulate,
    /// then confirm), and audit failures are logged but never fatal.
    pub fn cycle(&mut self, now_us: u64) -> Result<bool, Error> {
        let has_new = match self.watcher.poll() {
            Ok(has_new) => has_new,
            Err(Error::SourceUnavailable(e)) => {
                trace!("marker source unavailable this iteration: {}", e);
                false
            }
            Err(e) => return Err(e),
        };

        let event = {
            let sample = self.watcher.latest().ok();
            match self.engine.decide(sample, has_new, now_us) {
                Some(event) => event,
                None => return Ok(false),
            }
        };

        debug!(
            "event #{}: value {} (stim: {})",
            event.sequence_index,
            event.value,
            event.stimulation_worthy()
        );

        if event.stimulation_worthy() {
            self.command.send_stimulation_command()?;
        }
        if let Err(e) = self.audit.publish(&event) {
            warn!("{}", e);
        }
        self.confirm.strobe(event.sequence_index)?;

        self.watcher.clear_new_flag();
        Ok(true)
    }

    // Reverse acquisition order, unconditional on every exit path.
    fn release(&mut self) {
        self.confirm.close();
        self.audit.close();
        self.watcher.close();
        self.command.close();
    }
}

/// Host the loop on a dedicated worker thread. Returns the join handle and
/// the shared stop flag; raising the flag stops the loop cooperatively at
/// the next iteration boundary.
pub fn spawn<S, C, H, A, K>(
    mut dispatch: DispatchLoop<S, C, H, A, K>,
) -> (JoinHandle<Result<(), Error>>, Arc<AtomicBool>)
where
    S: MarkerSource + Send + 'static,
    C: CommandChannel + Send + 'static,
    H: ConfirmationLine + Send + 'static,
    A: AuditSink + Send + 'static,
    K: Clock + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let handle = thread::spawn(move || dispatch.run(&stop_flag));
    (handle, stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn settle_time_is_ninety_percent_of_poll_interval() {
        let config = DispatchConfig {
            poll_interval_us: 100,
            ..DispatchConfig::default()
        };
        struct NullSource;
        impl MarkerSource for NullSource {
            fn pull(&mut self, _: &mut Vec<crate::ingest::Sample>) -> Result<(), Error> {
                Ok(())
            }
            fn close(&mut self) {}
        }
        struct NullCommand;
        impl CommandChannel for NullCommand {
            fn send_stimulation_command(&mut self) -> Result<(), Error> {
                Ok(())
            }
            fn close(&mut self) {}
        }
        struct NullConfirm;
        impl ConfirmationLine for NullConfirm {
            fn strobe(&mut self, _: u8) -> Result<(), Error> {
                Ok(())
            }
            fn close(&mut self) {}
        }
        struct NullAudit;
        impl AuditSink for NullAudit {
            fn publish(&mut self, _: &decision::TriggerEvent) -> Result<(), Error> {
                Ok(())
            }
            fn close(&mut self) {}
        }

        let dispatch = DispatchLoop::new(
            MarkerWatcher::new(NullSource, 8),
            NullCommand,
            NullAudit,
            NullConfirm,
            ManualClock::new(),
            &config,
        );
        assert_eq!(dispatch.settle_us, 90);
        assert_eq!(dispatch.phase(), LoopPhase::Starting);
    }
}
