//! Radio helpers shared by the platform parsers

/// Convert a frequency in MHz to its channel number, 0 if unmapped
pub fn frequency_to_channel(freq_mhz: u32) -> u16 {
    let channel = match freq_mhz {
        2484 => 14,
        2412..=2472 => (freq_mhz - 2407) / 5,
        5160..=5885 => (freq_mhz - 5000) / 5,
        5955..=7115 => (freq_mhz - 5950) / 5,
        _ => 0,
    };
    channel as u16
}

/// Parse a textual frequency such as `2412`, `2412 MHz` or `5.18 GHz`
pub fn parse_frequency(text: &str) -> Option<u32> {
    let text = text.trim();
    let (number, scale) = if let Some(ghz) = text.strip_suffix("GHz") {
        (ghz.trim(), 1000.0)
    } else if let Some(mhz) = text.strip_suffix("MHz") {
        (mhz.trim(), 1.0)
    } else {
        (text, 1.0)
    };
    let value: f64 = number.parse().ok()?;
    let mhz = (value * scale).round();
    (mhz > 0.0 && mhz < f64::from(u32::MAX)).then_some(mhz as u32)
}

/// Convert a signal quality percentage (0-100) to an approximate dBm level
pub fn quality_to_dbm(quality: u8) -> i16 {
    i16::from(quality.min(100)) / 2 - 100
}

/// Parse the primary channel out of tool notations like `36,+1` or `149,80`
pub fn parse_channel(text: &str) -> u16 {
    text.split(|c: char| c == ',' || c == ' ' || c == '(')
        .next()
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(0)
}
