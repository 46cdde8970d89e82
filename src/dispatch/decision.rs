use crate::ingest::Sample;

// DECISION ENGINE -------------------------------------------------------------

/// Values strictly above this are stimulation-worthy. Markers at or below
/// it still produce a trigger event for the audit/confirmation paths but
/// never reach the stimulator.
pub const STIM_THRESHOLD: i32 = 127;

/// Sequence indices run 1..=SEQUENCE_MAX and wrap back to 1; 0 is reserved
/// for "no event yet" and never appears on the confirmation line.
pub const SEQUENCE_MAX: u8 = 255;

/// The decided output of the engine. Created once per accepted sample,
/// never mutated, dropped after dispatch to the three sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub value: i32,
    pub sequence_index: u8,
    pub timestamp_us: u64,
}

impl TriggerEvent {
    pub fn stimulation_worthy(&self) -> bool {
        self.value > STIM_THRESHOLD
    }
}

/// Debounce state machine: converts noisy repeated marker samples into at
/// most one trigger per genuine value change, spaced by the grace period.
///
/// Fires iff all of: new data exists, the grace period has elapsed since
/// the last accepted event, the sample is single-valued, and its value
/// differs from the last accepted one. A rejected sample causes zero state
/// change so it can be re-evaluated or superseded on the next poll.
pub struct DecisionEngine {
    grace_period_us: u64,
    last_value: Option<i32>,
    last_accept_us: u64,
    sequence: u8,
}

impl DecisionEngine {
    /// `start_us` seeds the grace reference, so the first event also waits
    /// out one grace period from engine start.
    pub fn new(grace_period_us: u64, start_us: u64) -> Self {
        Self {
            grace_period_us,
            last_value: None,
            last_accept_us: start_us,
            sequence: 0,
        }
    }

    pub fn decide(
        &mut self,
        sample: Option<&Sample>,
        has_new: bool,
        now_us: u64,
    ) -> Option<TriggerEvent> {
        if !has_new {
            return None;
        }
        if now_us.saturating_sub(self.last_accept_us) < self.grace_period_us {
            return None;
        }
        let value = sample?.scalar()?;
        if self.last_value == Some(value) {
            return None;
        }

        self.sequence = self.sequence % SEQUENCE_MAX + 1;
        self.last_value = Some(value);
        self.last_accept_us = now_us;
        Some(TriggerEvent {
            value,
            sequence_index: self.sequence,
            timestamp_us: now_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: u64 = 1_000;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(GRACE, 0)
    }

    fn single(v: i32) -> Sample {
        Sample::new(vec![v])
    }

    #[test]
    fn fires_only_on_new_changed_single_values() {
        let mut e = engine();
        // Grace not yet elapsed from start.
        assert!(e.decide(Some(&single(5)), true, GRACE - 1).is_none());
        // All conditions met.
        let ev = e.decide(Some(&single(5)), true, GRACE).unwrap();
        assert_eq!(ev.value, 5);
        assert_eq!(ev.sequence_index, 1);
        assert_eq!(ev.timestamp_us, GRACE);
        // Without new data, nothing fires no matter how long we wait.
        assert!(e.decide(Some(&single(6)), false, 10 * GRACE).is_none());
    }

    #[test]
    fn repeated_value_is_idempotent() {
        let mut e = engine();
        assert!(e.decide(Some(&single(5)), true, GRACE).is_some());
        for i in 0..100u64 {
            assert!(e.decide(Some(&single(5)), true, 2 * GRACE + i * GRACE).is_none());
        }
        // A different value still gets through afterwards.
        assert!(e.decide(Some(&single(6)), true, 200 * GRACE).is_some());
    }

    #[test]
    fn grace_period_drops_second_value_entirely() {
        let mut e = engine();
        assert!(e.decide(Some(&single(5)), true, GRACE).is_some());
        // Second distinct value arrives too soon: ignored, not deferred.
        assert!(e.decide(Some(&single(9)), true, GRACE + GRACE / 2).is_none());
        // The rejection changed nothing: value 9 is accepted once spacing allows.
        let ev = e.decide(Some(&single(9)), true, 2 * GRACE).unwrap();
        assert_eq!(ev.value, 9);
        assert_eq!(ev.sequence_index, 2);
    }

    #[test]
    fn multivalue_and_missing_samples_are_ignored() {
        let mut e = engine();
        assert!(e.decide(Some(&Sample::new(vec![5, 6])), true, GRACE).is_none());
        assert!(e.decide(None, true, GRACE).is_none());
        // Ignoring them left the engine ready to fire.
        assert!(e.decide(Some(&single(5)), true, GRACE).is_some());
    }

    #[test]
    fn sequence_wraps_to_one_never_zero() {
        let mut e = engine();
        let mut now = 0;
        for i in 0..(SEQUENCE_MAX as u32 + 3) {
            now += GRACE;
            // Alternate values so every sample is accepted.
            let ev = e.decide(Some(&single(i as i32)), true, now).unwrap();
            assert_ne!(ev.sequence_index, 0);
            let expected = (i % SEQUENCE_MAX as u32 + 1) as u8;
            assert_eq!(ev.sequence_index, expected);
        }
    }

    #[test]
    fn classification_boundary_at_cutoff() {
        let at = TriggerEvent {
            value: 127,
            sequence_index: 1,
            timestamp_us: 0,
        };
        let above = TriggerEvent {
            value: 128,
            sequence_index: 2,
            timestamp_us: 0,
        };
        assert!(!at.stimulation_worthy());
        assert!(above.stimulation_worthy());
    }

    #[test]
    fn scenario_five_two_hundred_three() {
        // Samples [5, 5, 200, 200, 3] with ample spacing: accepted events
        // are [5, 200, 3], stimulation-worthy only for 200.
        let mut e = engine();
        let mut now = 0;
        let mut accepted = Vec::new();
        for v in [5, 5, 200, 200, 3] {
            now += 2 * GRACE;
            if let Some(ev) = e.decide(Some(&single(v)), true, now) {
                accepted.push(ev);
            }
        }
        let values: Vec<i32> = accepted.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![5, 200, 3]);
        let stim: Vec<bool> = accepted.iter().map(|e| e.stimulation_worthy()).collect();
        assert_eq!(stim, vec![false, true, false]);
        let indices: Vec<u8> = accepted.iter().map(|e| e.sequence_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
