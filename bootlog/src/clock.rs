/// Clock correlation for the firmware tick domain.
///
/// The firmware has no battery-backed clock and cannot report wall-clock time; all it can report
/// is a free-running cycle counter and the counter's frequency.  The only reliable external
/// anchor is the timestamp at which the guest kernel starts booting, observable from the host
/// side, because firmware execution is defined to end exactly when the guest kernel starts.  We
/// therefore anchor the *last* tick reading of the boot to that wall-clock observation and
/// express every firmware timestamp as a (negative) offset from it - never against an independent
/// clock.
use crate::CollectError;

/// The bridge from ticks to wall-clock seconds.  Created once per run from the first and last
/// firmware log lines and discarded with the run.

#[derive(Debug, Clone, Copy)]
pub struct ClockAnchor {
    pub anchor_ticks: u64,
    pub tick_frequency_hz: u64,
    pub anchor_wallclock_secs: f64,
}

impl ClockAnchor {
    /// Build an anchor from the boundary tick readings of one boot and the wall-clock time of
    /// the last reading.  The frequency is declared on the first line and may be re-declared on
    /// the last; it is constant within one VM boot, so a difference means the log spans more
    /// than one boot and the anchor would be garbage.

    pub fn from_boundaries(
        first_ticks: u64,
        first_freq_hz: u64,
        last_ticks: u64,
        last_freq_hz: Option<u64>,
        wallclock_of_last_secs: f64,
    ) -> Result<ClockAnchor, CollectError> {
        if let Some(last_freq) = last_freq_hz {
            if last_freq != first_freq_hz {
                return Err(CollectError::FrequencyMismatch {
                    first: first_freq_hz,
                    last: last_freq,
                });
            }
        }
        if last_ticks < first_ticks {
            // The counter is monotone within one boot; a wrap means mixed-up logs.
            return Err(CollectError::OrderingViolation {
                start: "first tick reading".to_string(),
                start_secs: first_ticks as f64,
                end: "last tick reading".to_string(),
                end_secs: last_ticks as f64,
            });
        }
        Ok(ClockAnchor {
            anchor_ticks: last_ticks,
            tick_frequency_hz: first_freq_hz,
            anchor_wallclock_secs: wallclock_of_last_secs,
        })
    }

    /// Translate a tick reading into wall-clock seconds.  Readings before the anchor come out as
    /// timestamps before the anchor's wall-clock time, which is the normal case here: the whole
    /// firmware boot precedes the guest kernel start.

    pub fn to_wallclock(&self, ticks: u64) -> f64 {
        self.anchor_wallclock_secs
            + (ticks as f64 - self.anchor_ticks as f64) / self.tick_frequency_hz as f64
    }
}

#[test]
fn test_anchor_translation() {
    // 1 MHz counter, boot from tick 2_000_000 to tick 8_000_000, kernel starts at t=1000.
    let anchor =
        ClockAnchor::from_boundaries(2_000_000, 1_000_000, 8_000_000, Some(1_000_000), 1000.0)
            .unwrap();

    // The whole boot took 6 s, so its start is exactly kernel start minus 6 s.
    assert_eq!(anchor.to_wallclock(2_000_000), 994.0);
    assert_eq!(anchor.to_wallclock(8_000_000), 1000.0);
    assert_eq!(anchor.to_wallclock(5_000_000), 997.0);
}

#[test]
fn test_anchor_monotone() {
    let anchor =
        ClockAnchor::from_boundaries(1_000, 3_579_545, 90_000_000, None, 1_700_000_000.0).unwrap();
    let mut prev = f64::NEG_INFINITY;
    for ticks in (1_000..2_000_000).step_by(7_919) {
        let t = anchor.to_wallclock(ticks);
        assert!(t >= prev);
        prev = t;
    }
}

#[test]
fn test_frequency_mismatch_is_fatal() {
    let err = ClockAnchor::from_boundaries(0, 1_000_000, 100, Some(999_999), 0.0).unwrap_err();
    match err {
        CollectError::FrequencyMismatch { first, last } => {
            assert_eq!(first, 1_000_000);
            assert_eq!(last, 999_999);
        }
        _ => panic!("expected FrequencyMismatch"),
    }
    assert!(!err.is_transient());
}
