//! Display mode descriptors
//!
//! A mode is an immutable timing: the full set of horizontal/vertical
//! sync parameters a CRTC can drive a connector at. Two connectors that
//! report bit-identical timings share one `Mode` entry in the GPU table.

use std::fmt;

/// Mode flag bits, matching the kernel's `DRM_MODE_FLAG_*` layout.
/// The RandR mode flags use the same values for these bits.
pub const MODE_FLAG_PHSYNC: u32 = 1 << 0;
pub const MODE_FLAG_NHSYNC: u32 = 1 << 1;
pub const MODE_FLAG_PVSYNC: u32 = 1 << 2;
pub const MODE_FLAG_NVSYNC: u32 = 1 << 3;
pub const MODE_FLAG_INTERLACE: u32 = 1 << 4;
pub const MODE_FLAG_DBLSCAN: u32 = 1 << 5;

/// `DRM_MODE_TYPE_PREFERRED`
pub const MODE_TYPE_PREFERRED: u32 = 1 << 3;

/// Stable identifier of a mode within one GPU snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModeId(pub u32);

/// Raw timing parameters.
///
/// Equality and hashing cover every field here, and only these fields:
/// the human-readable name is stored on [`Mode`] and never participates,
/// so identical timings advertised under different names collapse to a
/// single table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeTiming {
    /// Pixel clock in kHz
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    /// Nominal vertical refresh in Hz as reported by the kernel
    pub vrefresh: u32,
    /// `MODE_FLAG_*` bits
    pub flags: u32,
    /// `DRM_MODE_TYPE_*` bits
    pub kind: u32,
}

impl ModeTiming {
    /// Compute the effective refresh rate in Hz from the timing itself.
    ///
    /// Interlaced modes scan half the lines per field, double-scan modes
    /// scan every line twice, and vscan > 1 repeats whole frames.
    pub fn refresh_rate(&self) -> f64 {
        if self.htotal == 0 || self.vtotal == 0 {
            return 0.0;
        }
        let mut numerator = u64::from(self.clock) * 1000;
        let mut denominator = u64::from(self.htotal) * u64::from(self.vtotal);
        if self.flags & MODE_FLAG_INTERLACE != 0 {
            numerator *= 2;
        }
        if self.flags & MODE_FLAG_DBLSCAN != 0 {
            denominator *= 2;
        }
        if self.vscan > 1 {
            denominator *= u64::from(self.vscan);
        }
        numerator as f64 / denominator as f64
    }

    pub fn is_preferred(&self) -> bool {
        self.kind & MODE_TYPE_PREFERRED != 0
    }
}

/// One entry in a GPU's mode table.
#[derive(Debug, Clone, PartialEq)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
    pub timing: ModeTiming,
}

impl Mode {
    pub fn width(&self) -> u32 {
        u32::from(self.timing.hdisplay)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.timing.vdisplay)
    }

    pub fn refresh_rate(&self) -> f64 {
        self.timing.refresh_rate()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}@{:.2})",
            self.name,
            self.width(),
            self.height(),
            self.refresh_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn timing_1080p60() -> ModeTiming {
        ModeTiming {
            clock: 148_500,
            hdisplay: 1920,
            hsync_start: 2008,
            hsync_end: 2052,
            htotal: 2200,
            hskew: 0,
            vdisplay: 1080,
            vsync_start: 1084,
            vsync_end: 1089,
            vtotal: 1125,
            vscan: 0,
            vrefresh: 60,
            flags: MODE_FLAG_PHSYNC | MODE_FLAG_PVSYNC,
            kind: 0,
        }
    }

    #[test]
    fn refresh_rate_from_timing() {
        let t = timing_1080p60();
        assert!((t.refresh_rate() - 60.0).abs() < 0.01);
    }

    #[test]
    fn interlace_doubles_doublescan_halves() {
        let mut t = timing_1080p60();
        let base = t.refresh_rate();
        t.flags |= MODE_FLAG_INTERLACE;
        assert!((t.refresh_rate() - base * 2.0).abs() < 0.01);
        t.flags = MODE_FLAG_DBLSCAN;
        assert!((t.refresh_rate() - base / 2.0).abs() < 0.01);
    }

    #[test]
    fn vscan_divides_refresh() {
        let mut t = timing_1080p60();
        t.vscan = 2;
        assert!((t.refresh_rate() - 30.0).abs() < 0.01);
    }

    #[test]
    fn timing_equality_ignores_nothing_but_covers_all_fields() {
        let a = timing_1080p60();
        let mut b = a;
        assert_eq!(a, b);
        b.hskew = 1;
        assert_ne!(a, b);
    }

    #[test]
    fn identical_timings_hash_together() {
        let mut set = HashSet::new();
        // Same timings as reported by two different connectors; the mode
        // names ("HDMI-1-mode0" vs "VGA-1-mode0") live outside the timing.
        set.insert(timing_1080p60());
        set.insert(timing_1080p60());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn zero_total_yields_zero_refresh() {
        let t = ModeTiming::default();
        assert_eq!(t.refresh_rate(), 0.0);
    }
}
