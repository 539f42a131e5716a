pub fn time_str(sec: f64) -> String {
    let ms = sec * 1000f64;
    let hours = (ms / 3600000f64) as u64;
    let minutes = ((ms % 3600000f64) / 60000f64) as u64;
    let seconds = ((ms % 60000f64) / 1000f64) as u64;
    let milliseconds = (ms % 1000f64) as u64;

    format!(
        "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}

/// Formats a 33-bit 90 kHz timestamp as a clock time.
pub fn ticks_str(ticks: u64) -> String {
    time_str(ticks as f64 / 90_000f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_ticks() {
        assert_eq!(ticks_str(0), "00:00:00.000");
        assert_eq!(ticks_str(90_000 * 61 + 45_000), "00:01:01.500");
        assert_eq!(ticks_str(90_000 * 3600 * 2), "02:00:00.000");
    }
}
