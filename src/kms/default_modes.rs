//! Fallback mode table
//!
//! Connectors with a panel fitter ("scaling mode" property) can run
//! timings their EDID never lists; a fixed table of common DMT/CEA/CVT
//! modes is offered on top of the native list, capped at the largest
//! dimensions and refresh any connector actually reports.

use crate::topology::mode::{
    ModeTiming, MODE_FLAG_NHSYNC, MODE_FLAG_NVSYNC, MODE_FLAG_PHSYNC, MODE_FLAG_PVSYNC,
};

/// Refresh rates within 1% of the cap still qualify.
const SYNC_TOLERANCE: f64 = 0.01;

pub struct DefaultMode {
    pub name: &'static str,
    pub timing: ModeTiming,
}

macro_rules! default_mode {
    ($name:literal, $clock:expr, $hd:expr, $hss:expr, $hse:expr, $ht:expr,
     $vd:expr, $vss:expr, $vse:expr, $vt:expr, $vr:expr, $flags:expr) => {
        DefaultMode {
            name: $name,
            timing: ModeTiming {
                clock: $clock,
                hdisplay: $hd,
                hsync_start: $hss,
                hsync_end: $hse,
                htotal: $ht,
                hskew: 0,
                vdisplay: $vd,
                vsync_start: $vss,
                vsync_end: $vse,
                vtotal: $vt,
                vscan: 0,
                vrefresh: $vr,
                flags: $flags,
                kind: 0,
            },
        }
    };
}

const NEG_NEG: u32 = MODE_FLAG_NHSYNC | MODE_FLAG_NVSYNC;
const POS_POS: u32 = MODE_FLAG_PHSYNC | MODE_FLAG_PVSYNC;
const NEG_POS: u32 = MODE_FLAG_NHSYNC | MODE_FLAG_PVSYNC;
const POS_NEG: u32 = MODE_FLAG_PHSYNC | MODE_FLAG_NVSYNC;

/// DMT, CEA-861 and CVT (reduced blanking) timings, smallest first.
pub const DEFAULT_MODES: &[DefaultMode] = &[
    default_mode!("640x480", 25_175, 640, 656, 752, 800, 480, 490, 492, 525, 60, NEG_NEG),
    default_mode!("800x600", 40_000, 800, 840, 968, 1056, 600, 601, 605, 628, 60, POS_POS),
    default_mode!("1024x768", 65_000, 1024, 1048, 1184, 1344, 768, 771, 777, 806, 60, NEG_NEG),
    default_mode!("1280x720", 74_250, 1280, 1390, 1430, 1650, 720, 725, 730, 750, 60, POS_POS),
    default_mode!("1280x800", 83_500, 1280, 1352, 1480, 1680, 800, 803, 809, 831, 60, NEG_POS),
    default_mode!("1280x1024", 108_000, 1280, 1328, 1440, 1688, 1024, 1025, 1028, 1066, 60, POS_POS),
    default_mode!("1366x768", 85_500, 1366, 1436, 1579, 1792, 768, 771, 774, 798, 60, POS_POS),
    default_mode!("1440x900", 106_500, 1440, 1520, 1672, 1904, 900, 903, 909, 934, 60, NEG_POS),
    default_mode!("1600x900", 108_000, 1600, 1624, 1704, 1800, 900, 901, 904, 1000, 60, POS_POS),
    default_mode!("1680x1050", 146_250, 1680, 1784, 1960, 2240, 1050, 1053, 1059, 1089, 60, NEG_POS),
    default_mode!("1920x1080", 148_500, 1920, 2008, 2052, 2200, 1080, 1084, 1089, 1125, 60, POS_POS),
    default_mode!("1920x1200", 154_000, 1920, 1968, 2000, 2080, 1200, 1203, 1209, 1235, 60, POS_NEG),
    default_mode!("2560x1440", 241_500, 2560, 2608, 2640, 2720, 1440, 1443, 1448, 1481, 60, POS_NEG),
    default_mode!("3840x2160", 297_000, 3840, 4016, 4104, 4400, 2160, 2168, 2178, 2250, 30, POS_POS),
];

/// Select the table entries that fit within an output's observed
/// limits: no larger than the biggest native mode in either dimension,
/// no faster than max(60 Hz, fastest native refresh) plus tolerance.
pub fn fallback_modes(
    max_hdisplay: u16,
    max_vdisplay: u16,
    max_refresh_rate: f64,
) -> Vec<&'static DefaultMode> {
    let refresh_cap = max_refresh_rate.max(60.0) * (1.0 + SYNC_TOLERANCE);
    DEFAULT_MODES
        .iter()
        .filter(|m| {
            m.timing.hdisplay <= max_hdisplay
                && m.timing.vdisplay <= max_vdisplay
                && m.timing.refresh_rate() <= refresh_cap
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_timings_land_near_nominal_refresh() {
        for m in DEFAULT_MODES {
            let actual = m.timing.refresh_rate();
            let nominal = m.timing.vrefresh as f64;
            assert!(
                (actual - nominal).abs() / nominal < 0.01,
                "{}: computed {:.3} Hz vs nominal {}",
                m.name,
                actual,
                nominal
            );
        }
    }

    #[test]
    fn dimension_caps_filter_the_table() {
        let modes = fallback_modes(1920, 1080, 60.0);
        assert!(modes.iter().any(|m| m.name == "1920x1080"));
        assert!(modes.iter().all(|m| m.timing.hdisplay <= 1920));
        assert!(modes.iter().all(|m| m.timing.vdisplay <= 1080));
        assert!(!modes.iter().any(|m| m.name == "2560x1440"));
    }

    #[test]
    fn refresh_cap_is_at_least_60() {
        // A 30 Hz panel still gets the 60 Hz entries
        let modes = fallback_modes(3840, 2160, 30.0);
        assert!(modes.iter().any(|m| m.name == "1920x1080"));
        assert!(modes.iter().any(|m| m.name == "3840x2160"));
    }

    #[test]
    fn tolerance_admits_marginally_fast_timings() {
        // 640x480 DMT actually runs at 59.94 Hz; a 59.5 Hz cap plus the
        // 1%-over-max(60, ...) rule still admits it.
        let modes = fallback_modes(640, 480, 59.5);
        assert!(modes.iter().any(|m| m.name == "640x480"));
    }
}
