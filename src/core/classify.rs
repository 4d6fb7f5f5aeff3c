//! Counter classification. Decides whether a raw counter value is forward
//! production, a device reset, or sensor jitter, and how much production
//! it contributes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Increment,
    Reset,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ReadingKind,
    pub delta: i64,
    pub increment: i64,
}

/// Classify one counter value against the previous value seen on the same
/// channel.
///
/// No previous value means the reading establishes the baseline of a new
/// run: no production is attributed to it. A negative delta within the
/// threshold is jitter (Noise), anything below that is a counter reset.
/// The threshold must not be negative; 0 recovers the legacy behavior
/// where every downward jump is a reset.
pub fn classify(previous: Option<i64>, current: i64, noise_threshold: i64) -> Classification {
    debug_assert!(noise_threshold >= 0);

    let previous = match previous {
        Some(value) => value,
        None => {
            return Classification {
                kind: ReadingKind::Increment,
                delta: 0,
                increment: 0,
            }
        }
    };

    let delta = current - previous;

    if delta >= 0 {
        Classification {
            kind: ReadingKind::Increment,
            delta,
            increment: delta,
        }
    } else if -delta <= noise_threshold {
        Classification {
            kind: ReadingKind::Noise,
            delta,
            increment: 0,
        }
    } else {
        Classification {
            kind: ReadingKind::Reset,
            delta,
            increment: 0,
        }
    }
}

/// Apply `classify` independently across N parallel counter channels
/// (e.g. the legacy OK/NOK pair). A missing previous channel is treated
/// as a fresh baseline for that channel.
pub fn classify_channels(
    previous: Option<&[i64]>,
    current: &[i64],
    noise_threshold: i64,
) -> Vec<Classification> {
    current
        .iter()
        .enumerate()
        .map(|(idx, &value)| {
            let prev = previous.and_then(|channels| channels.get(idx).copied());
            classify(prev, value, noise_threshold)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_cases() {
        // (previous, current, threshold, kind, delta, increment)
        let cases: &[(Option<i64>, i64, i64, ReadingKind, i64, i64)] = &[
            (None, 100, 5, ReadingKind::Increment, 0, 0),
            (Some(100), 150, 5, ReadingKind::Increment, 50, 50),
            (Some(100), 100, 5, ReadingKind::Increment, 0, 0),
            (Some(150), 148, 5, ReadingKind::Noise, -2, 0),
            (Some(150), 145, 5, ReadingKind::Noise, -5, 0),
            (Some(150), 144, 5, ReadingKind::Reset, -6, 0),
            (Some(148), 10, 5, ReadingKind::Reset, -138, 0),
            // threshold 0: every downward jump is a reset
            (Some(100), 99, 0, ReadingKind::Reset, -1, 0),
            (Some(100), 101, 0, ReadingKind::Increment, 1, 1),
        ];

        for &(previous, current, threshold, kind, delta, increment) in cases {
            let c = classify(previous, current, threshold);
            assert_eq!(c.kind, kind, "case {:?} -> {}", previous, current);
            assert_eq!(c.delta, delta, "case {:?} -> {}", previous, current);
            assert_eq!(c.increment, increment, "case {:?} -> {}", previous, current);
        }
    }

    #[test]
    fn forward_increment_is_exact() {
        for (prev, cur) in [(0, 0), (0, 1), (10, 5000), (1_000_000, 1_000_001)] {
            let c = classify(Some(prev), cur, 5);
            assert_eq!(c.kind, ReadingKind::Increment);
            assert_eq!(c.increment, cur - prev);
        }
    }

    #[test]
    fn increment_never_negative() {
        for cur in [-50, 0, 99, 100, 101, 10_000] {
            let c = classify(Some(100), cur, 3);
            assert!(c.increment >= 0);
        }
    }

    #[test]
    fn channels_are_independent() {
        let result = classify_channels(Some(&[100, 40][..]), &[150, 39], 0);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].kind, ReadingKind::Increment);
        assert_eq!(result[0].increment, 50);
        assert_eq!(result[1].kind, ReadingKind::Reset);
        assert_eq!(result[1].increment, 0);
    }

    #[test]
    fn new_channel_is_a_baseline() {
        let result = classify_channels(Some(&[100][..]), &[150, 40], 0);
        assert_eq!(result[1].delta, 0);
        assert_eq!(result[1].increment, 0);
    }
}
