use vigil_core::{Status, Thresholds};

/// Apply the shared threshold rules to a numeric reading.
///
/// Alarm thresholds win over warning thresholds; a `high_*` threshold
/// triggers at-or-above, a `low_*` threshold at-or-below.
pub fn classify_value(value: f64, thresholds: &Thresholds) -> Status {
    if thresholds.high_alarm.is_some_and(|t| value >= t)
        || thresholds.low_alarm.is_some_and(|t| value <= t)
    {
        Status::Alarm
    } else if thresholds.high_warning.is_some_and(|t| value >= t)
        || thresholds.low_warning.is_some_and(|t| value <= t)
    {
        Status::Warning
    } else {
        Status::Ok
    }
}

/// The threshold the value crossed, if any. Recorded on the alert as
/// `threshold_value`.
pub fn crossed_threshold(value: f64, thresholds: &Thresholds) -> Option<f64> {
    if let Some(t) = thresholds.high_alarm.filter(|t| value >= *t) {
        return Some(t);
    }
    if let Some(t) = thresholds.low_alarm.filter(|t| value <= *t) {
        return Some(t);
    }
    if let Some(t) = thresholds.high_warning.filter(|t| value >= *t) {
        return Some(t);
    }
    thresholds.low_warning.filter(|t| value <= *t)
}

/// The more severe of two observation statuses.
///
/// Severity order: ok < warning < alarm < error.
pub fn worst(a: Status, b: Status) -> Status {
    fn rank(s: Status) -> u8 {
        match s {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Alarm => 2,
            Status::Error => 3,
        }
    }
    if rank(a) >= rank(b) { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn th(
        low_warning: Option<f64>,
        high_warning: Option<f64>,
        low_alarm: Option<f64>,
        high_alarm: Option<f64>,
    ) -> Thresholds {
        Thresholds {
            low_warning,
            high_warning,
            low_alarm,
            high_alarm,
        }
    }

    #[test]
    fn no_thresholds_is_ok() {
        assert_eq!(classify_value(99.0, &Thresholds::default()), Status::Ok);
    }

    #[test]
    fn high_alarm_beats_high_warning() {
        let t = th(None, Some(80.0), None, Some(95.0));
        assert_eq!(classify_value(70.0, &t), Status::Ok);
        assert_eq!(classify_value(85.0, &t), Status::Warning);
        assert_eq!(classify_value(95.0, &t), Status::Alarm);
    }

    #[test]
    fn low_thresholds_trigger_at_or_below() {
        let t = th(Some(20.0), None, Some(5.0), None);
        assert_eq!(classify_value(30.0, &t), Status::Ok);
        assert_eq!(classify_value(20.0, &t), Status::Warning);
        assert_eq!(classify_value(5.0, &t), Status::Alarm);
    }

    #[test]
    fn crossed_threshold_reports_the_boundary() {
        let t = th(None, Some(80.0), None, Some(95.0));
        assert_eq!(crossed_threshold(85.0, &t), Some(80.0));
        assert_eq!(crossed_threshold(99.0, &t), Some(95.0));
        assert_eq!(crossed_threshold(10.0, &t), None);
    }

    #[test]
    fn worst_ordering() {
        assert_eq!(worst(Status::Ok, Status::Warning), Status::Warning);
        assert_eq!(worst(Status::Alarm, Status::Warning), Status::Alarm);
        assert_eq!(worst(Status::Error, Status::Alarm), Status::Error);
        assert_eq!(worst(Status::Ok, Status::Ok), Status::Ok);
    }
}
