//! Fixed time-of-day approximation of solar generation.
//!
//! The table below sketches a generic mid-latitude day in six
//! segments: night, pre-dawn, a morning ramp, the noon peak, an
//! afternoon decline, and an evening shutdown. Hours between key
//! points are linearly interpolated. It is an approximation for
//! installations without a live solar feed, not a forecast.

/// (hour, fraction of peak generation), sorted by hour.
const KEY_POINTS: &[(u8, f64)] = &[
    (0, 0.0),
    (6, 0.0),
    (7, 0.1),
    (8, 0.2),
    (9, 0.4),
    (10, 0.6),
    (11, 0.8),
    (12, 1.0),
    (13, 1.0),
    (14, 0.9),
    (15, 0.7),
    (16, 0.5),
    (17, 0.3),
    (18, 0.1),
    (19, 0.0),
    (23, 0.0),
];

/// Fraction of peak generation for a local hour-of-day (0--23).
pub fn curve_fraction(hour: u8) -> f64 {
    let hour = hour.min(23);

    let mut before = KEY_POINTS[0];
    for &point in KEY_POINTS {
        if point.0 == hour {
            return point.1;
        }
        if point.0 < hour {
            before = point;
        } else {
            // First key point past the hour; interpolate.
            let span = f64::from(point.0 - before.0);
            let offset = f64::from(hour - before.0);
            return before.1 + (point.1 - before.1) * (offset / span);
        }
    }
    before.1
}

/// Watt target for a local hour, scaled to the installation's peak.
pub fn curve_watts(hour: u8, peak_watts: f64) -> f64 {
    curve_fraction(hour) * peak_watts
}
