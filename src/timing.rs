//! Segment timing: narration durations to on-screen intervals.

use serde::Serialize;

use crate::error::{RenderError, RenderResult};

/// Allowed gap between a caller-declared length and the summed narration.
pub const LENGTH_TOLERANCE_SECS: f64 = 1.0;

/// Active window of one narration segment. `start <= t < end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub segment_index: usize,
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Contiguous, non-overlapping intervals starting at 0. Index 0 is the title.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    intervals: Vec<Interval>,
}

impl Timeline {
    /// Prefix-sum segment durations into intervals.
    ///
    /// Each interval's start is the previous interval's end, so contiguity holds
    /// exactly rather than within rounding.
    pub fn from_durations(durations: &[f64]) -> RenderResult<Self> {
        let mut intervals = Vec::with_capacity(durations.len());
        let mut cursor = 0.0_f64;
        for (segment_index, &duration) in durations.iter().enumerate() {
            if !duration.is_finite() || duration < 0.0 {
                return Err(RenderError::Config(format!(
                    "segment {segment_index} has invalid duration {duration}"
                )));
            }
            let end = cursor + duration;
            intervals.push(Interval {
                segment_index,
                start: cursor,
                end,
            });
            cursor = end;
        }
        Ok(Self { intervals })
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn get(&self, segment_index: usize) -> Option<&Interval> {
        self.intervals.get(segment_index)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// End of the last interval, i.e. the video length.
    pub fn total(&self) -> f64 {
        self.intervals.last().map(|i| i.end).unwrap_or(0.0)
    }

    /// Resolve the length used for progress normalization.
    ///
    /// A declared length must agree with the timeline total within
    /// [`LENGTH_TOLERANCE_SECS`].
    pub fn reconcile_length(&self, declared: Option<f64>) -> RenderResult<f64> {
        let actual = self.total();
        match declared {
            None => Ok(actual),
            Some(declared) if (declared - actual).abs() <= LENGTH_TOLERANCE_SECS => Ok(declared),
            Some(declared) => Err(RenderError::LengthMismatch { declared, actual }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn worked_example_matches_declared_length() {
        let timeline = Timeline::from_durations(&[3.2, 4.0, 2.8]).unwrap();
        let expected = [(0, 0.0, 3.2), (1, 3.2, 7.2), (2, 7.2, 10.0)];
        assert_eq!(timeline.len(), 3);
        for (interval, (idx, start, end)) in timeline.intervals().iter().zip(expected) {
            assert_eq!(interval.segment_index, idx);
            assert!((interval.start - start).abs() < EPS);
            assert!((interval.end - end).abs() < EPS);
        }
        assert!((timeline.total() - 10.0).abs() < EPS);
        assert!((timeline.reconcile_length(Some(10.0)).unwrap() - 10.0).abs() < EPS);
    }

    #[test]
    fn total_equals_sum_and_intervals_are_contiguous() {
        let cases: [&[f64]; 4] = [
            &[1.0],
            &[0.1, 0.2, 0.3, 0.4, 0.5],
            &[12.345, 0.0, 7.77, 3.3333333],
            &[2.5; 40],
        ];
        for durations in cases {
            let timeline = Timeline::from_durations(durations).unwrap();
            let sum: f64 = durations.iter().sum();
            assert!((timeline.total() - sum).abs() < 1e-6);
            assert_eq!(timeline.intervals()[0].start, 0.0);
            for pair in timeline.intervals().windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert!(pair[0].start <= pair[0].end);
            }
        }
    }

    #[test]
    fn empty_durations_give_empty_timeline() {
        let timeline = Timeline::from_durations(&[]).unwrap();
        assert!(timeline.is_empty());
        assert_eq!(timeline.total(), 0.0);
    }

    #[test]
    fn negative_or_nan_duration_is_rejected() {
        assert!(Timeline::from_durations(&[1.0, -0.5]).is_err());
        assert!(Timeline::from_durations(&[f64::NAN]).is_err());
    }

    #[test]
    fn declared_length_outside_tolerance_is_rejected() {
        let timeline = Timeline::from_durations(&[3.0, 4.0]).unwrap();
        assert_eq!(timeline.reconcile_length(None).unwrap(), 7.0);
        assert_eq!(timeline.reconcile_length(Some(7.4)).unwrap(), 7.4);
        let err = timeline.reconcile_length(Some(12.0)).unwrap_err();
        assert!(matches!(err, RenderError::LengthMismatch { .. }));
    }
}
