use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Format of correlation ids: UTC time at microsecond resolution.
pub const CORRELATION_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// Issues strictly increasing correlation ids.
///
/// When the clock has not advanced past the previous id, the previous
/// instant plus one microsecond is used instead.
#[derive(Debug, Default)]
pub struct CorrelationIdGenerator {
    last_micros: Mutex<Option<i64>>,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id based on the current time.
    pub fn next_id(&self) -> String {
        self.next_at(Utc::now())
    }

    /// Next id for a given clock reading.
    pub fn next_at(&self, now: DateTime<Utc>) -> String {
        let mut last = self.last_micros.lock().unwrap_or_else(|e| e.into_inner());
        let mut micros = now.timestamp_micros();
        if let Some(prev) = *last {
            if micros <= prev {
                micros = prev + 1;
            }
        }
        *last = Some(micros);
        format_micros(micros)
    }
}

fn format_micros(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .unwrap_or_default()
        .format(CORRELATION_ID_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format() {
        let gen = CorrelationIdGenerator::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::microseconds(42);
        assert_eq!(gen.next_at(at), "20240309_140507_000042");
    }

    #[test]
    fn test_same_instant_is_bumped() {
        let gen = CorrelationIdGenerator::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let a = gen.next_at(at);
        let b = gen.next_at(at);
        let c = gen.next_at(at - chrono::Duration::seconds(5));
        assert_eq!(a, "20240309_140507_000000");
        assert_eq!(b, "20240309_140507_000001");
        assert_eq!(c, "20240309_140507_000002");
    }

    #[test]
    fn test_rapid_ids_are_unique_and_ordered() {
        let gen = CorrelationIdGenerator::new();
        let ids: Vec<String> = (0..1000).map(|_| gen.next_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }
}
