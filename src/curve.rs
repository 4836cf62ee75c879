//! Piecewise-linear lookup tables

/// A lookup table of `(x, y)` points, sorted by ascending `x`
pub type Curve = &'static [(i32, i32)];

/// Lithium-ion open-circuit voltage (mV) to state of charge (%)
pub const CAPACITY: Curve = &[
    (3400, 0),
    (3600, 5),
    (3680, 10),
    (3720, 20),
    (3760, 30),
    (3790, 40),
    (3830, 50),
    (3880, 60),
    (3940, 70),
    (4010, 80),
    (4090, 90),
    (4170, 100),
];

/// Battery thermistor conversion (raw ADC) to temperature (°C)
pub const THERMISTOR: Curve = &[
    (180, 80),
    (250, 65),
    (320, 55),
    (400, 45),
    (500, 32),
    (600, 22),
    (700, 12),
    (780, 3),
    (840, -5),
    (900, -15),
    (960, -30),
];

/// Look up `x`, interpolating linearly between neighbouring points
///
/// Values outside the table clamp to the first or last point. An empty
/// table maps everything to zero.
///
/// ```
/// use sc88xx_drivers::curve::interpolate;
///
/// let curve = &[(0, 0), (10, 100)];
/// assert_eq!(interpolate(curve, 5), 50);
/// assert_eq!(interpolate(curve, 20), 100);
/// ```
pub fn interpolate(curve: &[(i32, i32)], x: i32) -> i32 {
    let (first, last) = match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return 0,
    };
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for pair in curve.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x0 <= x && x < x1 {
            return y0 + (x - x0) * (y1 - y0) / (x1 - x0);
        }
    }
    last.1
}

/// Capacity in percent for a battery voltage, clamped to `[0, 100]`
pub fn capacity(curve: &[(i32, i32)], millivolts: u32) -> u8 {
    let millivolts = i32::try_from(millivolts).unwrap_or(i32::MAX);
    interpolate(curve, millivolts).clamp(0, 100) as u8
}
