//! Energy/bin conversion for multi-channel analyser spectra.
//!
//! Xspress3 firmware buckets photon energies into fixed 10 eV bins. The
//! forward transform truncates toward zero, so energies only round-trip to
//! within one bin width.

/// Width of one MCA bin in electron-volts.
pub const BIN_WIDTH_EV: i64 = 10;

/// Converts an energy in eV to a bin index (truncating).
#[inline]
#[must_use]
pub fn ev_to_bin(ev: i64) -> i64 {
    ev / BIN_WIDTH_EV
}

/// Converts a bin index to the energy (eV) at its lower edge.
#[inline]
#[must_use]
pub fn bin_to_ev(bin: i64) -> i64 {
    bin * BIN_WIDTH_EV
}

/// Truncates a caller-supplied energy to whole eV.
///
/// Returns `None` for NaN or infinite energies.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn whole_ev(ev: f64) -> Option<i64> {
    ev.is_finite().then(|| ev.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_roundtrip() {
        for bin in [0, 1, 64, 640, 2047] {
            assert_eq!(ev_to_bin(bin_to_ev(bin)), bin);
        }
    }

    #[test]
    fn test_energy_roundtrip_within_resolution() {
        for ev in [0, 9, 10, 6399, 6400, 12_345] {
            let back = bin_to_ev(ev_to_bin(ev));
            assert!(back <= ev);
            assert!(ev - back < BIN_WIDTH_EV);
        }
    }

    #[test]
    fn test_truncation() {
        assert_eq!(ev_to_bin(6409), 640);
        assert_eq!(ev_to_bin(-15), -1);
        assert_eq!(whole_ev(6400.9), Some(6400));
        assert_eq!(whole_ev(-0.5), Some(0));
        assert_eq!(whole_ev(f64::NAN), None);
        assert_eq!(whole_ev(f64::INFINITY), None);
    }
}
