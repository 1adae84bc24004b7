//! Resolution ladder planning.

use serde::{Deserialize, Serialize};
use vpipe_models::encoding::{LADDER_HEIGHTS, MIN_USEFUL_BITRATE_BPS};

/// One planned output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rung {
    pub width: u32,
    pub height: u32,
}

/// Rungs to attempt for a native resolution, tallest first.
///
/// Only heights strictly below the native height are kept. Widths keep the
/// native aspect ratio, rounded to the nearest even number.
pub fn plan_ladder(native_width: u32, native_height: u32) -> Vec<Rung> {
    if native_width == 0 || native_height == 0 {
        return Vec::new();
    }

    LADDER_HEIGHTS
        .iter()
        .copied()
        .filter(|h| *h < native_height)
        .map(|height| Rung {
            width: even_width(native_width, native_height, height),
            height,
        })
        .collect()
}

/// Aspect-preserving width for `target_height`, rounded to an even value.
pub fn even_width(native_width: u32, native_height: u32, target_height: u32) -> u32 {
    let exact = native_width as f64 * target_height as f64 / native_height as f64;
    let even = ((exact / 2.0).round() as u32) * 2;
    even.max(2)
}

/// Whether to produce the next smaller rung after one with this bitrate.
///
/// An unmeasurable bitrate does not stop the ladder.
pub fn should_continue(rung_bitrate: Option<u64>) -> bool {
    match rung_bitrate {
        Some(bps) => bps > MIN_USEFUL_BITRATE_BPS,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1080p_native_skips_1080() {
        let ladder = plan_ladder(1920, 1080);
        assert_eq!(
            ladder,
            vec![
                Rung { width: 1280, height: 720 },
                Rung { width: 854, height: 480 },
            ]
        );
    }

    #[test]
    fn test_4k_native() {
        let heights: Vec<_> = plan_ladder(3840, 2160).iter().map(|r| r.height).collect();
        assert_eq!(heights, vec![1080, 720, 480]);
    }

    #[test]
    fn test_small_native_has_no_rungs() {
        assert!(plan_ladder(640, 480).is_empty());
        assert!(plan_ladder(320, 240).is_empty());
        assert!(plan_ladder(0, 0).is_empty());
    }

    #[test]
    fn test_ladder_properties_across_resolutions() {
        let natives = [
            (1920, 1080),
            (1080, 1920),
            (1440, 1080),
            (2560, 1440),
            (1279, 721),
            (3840, 2160),
            (1000, 1000),
            (853, 481),
        ];

        for (w, h) in natives {
            let ladder = plan_ladder(w, h);
            let mut previous = u32::MAX;
            for rung in &ladder {
                assert!(LADDER_HEIGHTS.contains(&rung.height));
                assert!(rung.height < h, "{w}x{h}: rung {} not below native", rung.height);
                assert!(rung.height < previous, "{w}x{h}: not strictly decreasing");
                assert_eq!(rung.width % 2, 0, "{w}x{h}: odd width {}", rung.width);

                let expected = w as f64 * rung.height as f64 / h as f64;
                assert!((rung.width as f64 - expected).abs() <= 1.0);
                previous = rung.height;
            }
        }
    }

    #[test]
    fn test_stop_rule() {
        assert!(should_continue(Some(MIN_USEFUL_BITRATE_BPS + 1)));
        assert!(!should_continue(Some(MIN_USEFUL_BITRATE_BPS)));
        assert!(!should_continue(Some(100_000)));
        assert!(should_continue(None));
    }
}
