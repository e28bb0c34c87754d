//! Distance-to-fill conversion.
//!
//! A distance sensor mounted in the lid measures the gap down to the top of
//! the waste. An empty bin reads its full calibration height, a full bin
//! reads close to zero.

/// Converts a distance reading into a fill percentage.
///
/// Readings beyond the bin's depth count as empty rather than as an error.
/// The result is clamped to `[0, 100]` and rounded to one decimal place.
/// `height_cm` must be positive; configuration loading rejects anything else.
pub fn compute_fill(distance_cm: f64, height_cm: f64) -> f64 {
    let effective = distance_cm.min(height_cm);
    let fill = (1.0 - effective / height_cm) * 100.0;
    round_tenth(fill.clamp(0.0, 100.0))
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_sensor_is_full() {
        assert_eq!(compute_fill(0.0, 40.0), 100.0);
    }

    #[test]
    fn test_reading_at_depth_is_empty() {
        assert_eq!(compute_fill(40.0, 40.0), 0.0);
    }

    #[test]
    fn test_reading_beyond_depth_is_clamped() {
        assert_eq!(compute_fill(80.0, 40.0), 0.0);
        assert_eq!(compute_fill(400.0, 40.0), 0.0);
    }

    #[test]
    fn test_negative_distance_is_clamped() {
        assert_eq!(compute_fill(-5.0, 40.0), 100.0);
    }

    #[test]
    fn test_quarter_full_scenarios() {
        assert_eq!(compute_fill(10.0, 40.0), 75.0);
        assert_eq!(compute_fill(2.0, 40.0), 95.0);
    }

    #[test]
    fn test_rounds_to_one_decimal() {
        // 1 - 13/40 = 0.675 -> 67.5; 1 - 1/3 -> 66.666.. -> 66.7
        assert_eq!(compute_fill(13.0, 40.0), 67.5);
        assert_eq!(compute_fill(10.0, 30.0), 66.7);
    }

    #[test]
    fn test_always_within_bounds() {
        for height in [1.0, 12.5, 40.0, 120.0] {
            let mut distance = -10.0;
            while distance < height * 3.0 {
                let fill = compute_fill(distance, height);
                assert!((0.0..=100.0).contains(&fill), "fill {fill} out of range for d={distance}, h={height}");
                distance += 0.7;
            }
        }
    }
}
