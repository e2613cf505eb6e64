//! Piecewise-linear intensity → RGBA gradient.
//!
//! Transparent at zero activity, then blue → cyan → yellow → orange → red,
//! tracking the QUIET / MODERATE / BUSY / VERY_BUSY venue vocabulary.

/// One gradient stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub t: f64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

const fn stop(t: f64, r: u8, g: u8, b: u8, a: u8) -> ColorStop {
    ColorStop { t, r, g, b, a }
}

/// Ordered by `t`; alpha never decreases.
pub const HEAT_STOPS: [ColorStop; 11] = [
    stop(0.00, 0, 0, 0, 0),
    stop(0.05, 40, 70, 255, 30),
    stop(0.10, 30, 110, 255, 70),
    // QUIET
    stop(0.20, 0, 160, 255, 110),
    stop(0.30, 0, 205, 240, 135),
    // MODERATE
    stop(0.40, 0, 235, 210, 155),
    stop(0.50, 140, 240, 90, 170),
    // BUSY
    stop(0.60, 255, 235, 0, 185),
    stop(0.75, 255, 160, 0, 205),
    // VERY_BUSY
    stop(0.88, 255, 80, 0, 225),
    stop(1.00, 255, 30, 10, 240),
];

/// Map a normalized intensity to RGBA. Input is clamped to `[0, 1]`.
pub fn get_color(intensity: f64) -> [u8; 4] {
    let v = if intensity.is_nan() {
        0.0
    } else {
        intensity.clamp(0.0, 1.0)
    };

    let upper_idx = HEAT_STOPS
        .iter()
        .position(|s| s.t >= v)
        .unwrap_or(HEAT_STOPS.len() - 1);
    if upper_idx == 0 {
        let s = HEAT_STOPS[0];
        return [s.r, s.g, s.b, s.a];
    }

    let lo = HEAT_STOPS[upper_idx - 1];
    let hi = HEAT_STOPS[upper_idx];
    let f = (v - lo.t) / (hi.t - lo.t);
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    [
        lerp(lo.r, hi.r),
        lerp(lo.g, hi.g),
        lerp(lo.b, hi.b),
        lerp(lo.a, hi.a),
    ]
}
