//! Rotation and pacing state for one dispatch run

use std::time::Duration;

use embermail_common::types::DispatchPolicy;

/// Owns the provider cursor and the sent-counters that drive provider
/// rotation and delay pacing, separate from the orchestrator loop so the
/// triggers are testable on their own. Everything here works at unit
/// granularity: one email, one BCC batch, or one SMS.
#[derive(Debug)]
pub struct RotationController {
    provider_count: usize,
    rotate_after: u32,
    delay: Duration,
    delay_every: u32,
    provider_index: usize,
    sent_since_rotation: u32,
    sent_since_delay: u32,
}

impl RotationController {
    pub fn new(policy: &DispatchPolicy, provider_count: usize) -> Self {
        Self {
            provider_count: provider_count.max(1),
            rotate_after: policy.rotate_after_n,
            delay: Duration::from_secs(policy.delay_seconds),
            delay_every: policy.delay_every_n,
            provider_index: 0,
            sent_since_rotation: 0,
            sent_since_delay: 0,
        }
    }

    /// Current provider cursor
    pub fn provider_index(&self) -> usize {
        self.provider_index
    }

    /// Evaluated before each unit. Returns the index of the provider to
    /// switch to once the rotation threshold has been reached; the caller
    /// closes the old connection and opens a new one.
    pub fn check_rotation(&mut self) -> Option<usize> {
        if self.rotate_after > 0 && self.sent_since_rotation >= self.rotate_after {
            self.provider_index = (self.provider_index + 1) % self.provider_count;
            self.sent_since_rotation = 0;
            Some(self.provider_index)
        } else {
            None
        }
    }

    /// Evaluated after each unit: bumps the counters and returns how long
    /// to pause when pacing calls for one here. With `delay_every_n == 0`
    /// the pause is unconditional, otherwise it lands after every N units.
    pub fn record_sent(&mut self) -> Option<Duration> {
        self.sent_since_rotation += 1;
        self.sent_since_delay += 1;

        if self.delay.is_zero() {
            return None;
        }
        if self.delay_every == 0 || self.sent_since_delay % self.delay_every == 0 {
            Some(self.delay)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy(rotate_after_n: u32, delay_seconds: u64, delay_every_n: u32) -> DispatchPolicy {
        DispatchPolicy {
            rotate_after_n,
            delay_seconds,
            delay_every_n,
            ..DispatchPolicy::default()
        }
    }

    #[test]
    fn test_rotation_sequence_across_three_providers() {
        // rotate_after_n=2 with 3 providers over 5 units: [0, 0, 1, 1, 2]
        let mut controller = RotationController::new(&policy(2, 0, 0), 3);
        let mut sequence = Vec::new();
        for _ in 0..5 {
            controller.check_rotation();
            sequence.push(controller.provider_index());
            controller.record_sent();
        }
        assert_eq!(sequence, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_rotation_wraps_around() {
        let mut controller = RotationController::new(&policy(1, 0, 0), 2);
        let mut sequence = Vec::new();
        for _ in 0..4 {
            controller.check_rotation();
            sequence.push(controller.provider_index());
            controller.record_sent();
        }
        assert_eq!(sequence, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_rotation_disabled_by_default() {
        let mut controller = RotationController::new(&DispatchPolicy::default(), 3);
        for _ in 0..10 {
            assert_eq!(controller.check_rotation(), None);
            controller.record_sent();
        }
        assert_eq!(controller.provider_index(), 0);
    }

    #[test]
    fn test_pacing_every_second_unit() {
        // delay_seconds=1, delay_every_n=2 over 4 units: sleeps after 2 and 4
        let mut controller = RotationController::new(&policy(0, 1, 2), 1);
        let pauses: Vec<Option<Duration>> = (0..4).map(|_| controller.record_sent()).collect();
        assert_eq!(
            pauses,
            vec![
                None,
                Some(Duration::from_secs(1)),
                None,
                Some(Duration::from_secs(1)),
            ]
        );
    }

    #[test]
    fn test_pacing_unconditional_when_every_n_is_zero() {
        let mut controller = RotationController::new(&policy(0, 3, 0), 1);
        assert_eq!(controller.record_sent(), Some(Duration::from_secs(3)));
        assert_eq!(controller.record_sent(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_no_pacing_without_delay() {
        let mut controller = RotationController::new(&policy(0, 0, 2), 1);
        for _ in 0..5 {
            assert_eq!(controller.record_sent(), None);
        }
    }
}
