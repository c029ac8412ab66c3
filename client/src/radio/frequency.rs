//! Carrier frequency and band derived from the channel number

use super::RadioGeneration;

/// Downlink carrier in MHz and a band label
#[derive(Debug, Clone, PartialEq)]
pub struct Carrier {
    pub frequency: Option<f64>,
    pub band: Option<String>,
}

impl Carrier {
    fn unknown() -> Self {
        Self {
            frequency: None,
            band: None,
        }
    }
}

pub fn derive(generation: RadioGeneration, channel: i32) -> Carrier {
    match generation {
        RadioGeneration::Gsm => gsm(channel),
        RadioGeneration::Lte => Carrier {
            frequency: Some(2110.0 + 0.1 * f64::from(channel)),
            band: Some("LTE Band".to_string()),
        },
        RadioGeneration::Wcdma => Carrier {
            frequency: Some(2110.0 + 0.2 * f64::from(channel - 10562)),
            band: Some("WCDMA Band".to_string()),
        },
        RadioGeneration::Nr => Carrier {
            frequency: Some(0.001 * f64::from(channel)),
            band: Some("NR Band".to_string()),
        },
        RadioGeneration::Cdma | RadioGeneration::Unknown => Carrier::unknown(),
    }
}

/// 3GPP downlink formula per band. ARFCN 512 is 1805.2 MHz, not 1805.0, and
/// channels outside the four bands get no frequency.
fn gsm(arfcn: i32) -> Carrier {
    let n = f64::from(arfcn);
    let (frequency, band) = match arfcn {
        0..=124 => (Some(935.0 + 0.2 * n), "GSM 900"),
        975..=1023 => (Some(935.0 + 0.2 * (n - 1024.0)), "GSM 900 (Extended)"),
        128..=251 => (Some(869.2 + 0.2 * (n - 128.0)), "GSM 850"),
        512..=885 => (Some(1805.2 + 0.2 * (n - 512.0)), "GSM 1800"),
        _ => (None, "GSM Unknown"),
    };
    Carrier {
        frequency,
        band: Some(band.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_mhz(carrier: &Carrier, expected: f64) {
        let got = carrier.frequency.expect("frequency should be derived");
        assert!((got - expected).abs() < 1e-6, "expected {expected}, got {got}");
    }

    #[test]
    fn test_reference_points() {
        assert_mhz(&derive(RadioGeneration::Gsm, 100), 955.0);
        assert_mhz(&derive(RadioGeneration::Lte, 300), 2140.0);
    }

    #[test]
    fn test_gsm_band_breakpoints() {
        let primary = derive(RadioGeneration::Gsm, 0);
        assert_mhz(&primary, 935.0);
        assert_eq!(primary.band.as_deref(), Some("GSM 900"));
        assert_mhz(&derive(RadioGeneration::Gsm, 124), 959.8);

        let extended = derive(RadioGeneration::Gsm, 975);
        assert_mhz(&extended, 925.2);
        assert_eq!(extended.band.as_deref(), Some("GSM 900 (Extended)"));
        assert_mhz(&derive(RadioGeneration::Gsm, 1023), 934.8);

        let gsm850 = derive(RadioGeneration::Gsm, 128);
        assert_mhz(&gsm850, 869.2);
        assert_eq!(gsm850.band.as_deref(), Some("GSM 850"));
        assert_mhz(&derive(RadioGeneration::Gsm, 251), 893.8);

        let dcs = derive(RadioGeneration::Gsm, 512);
        assert_mhz(&dcs, 1805.2);
        assert_eq!(dcs.band.as_deref(), Some("GSM 1800"));
        assert_mhz(&derive(RadioGeneration::Gsm, 885), 1879.8);
    }

    #[test]
    fn test_gsm_out_of_band() {
        for arfcn in [125, 127, 300, 900, 2000, -5] {
            let carrier = derive(RadioGeneration::Gsm, arfcn);
            assert!(carrier.frequency.is_none(), "arfcn {arfcn}");
            assert_eq!(carrier.band.as_deref(), Some("GSM Unknown"));
        }
    }

    #[test]
    fn test_other_generations() {
        let wcdma = derive(RadioGeneration::Wcdma, 10700);
        assert_mhz(&wcdma, 2137.6);
        assert_eq!(wcdma.band.as_deref(), Some("WCDMA Band"));

        let nr = derive(RadioGeneration::Nr, 632628);
        assert_mhz(&nr, 632.628);
        assert_eq!(nr.band.as_deref(), Some("NR Band"));

        assert_eq!(derive(RadioGeneration::Cdma, 283), Carrier::unknown());
    }
}
