/// Relative Strength Index over a slice of close prices (oldest first).
///
/// Uses Wilder's smoothed moving average. Returns `None` until at least
/// `period + 1` values are available, or if `period < 2`.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period < 2 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let seed = &changes[..period];

    let mut avg_gain = seed.iter().filter(|&&c| c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        seed.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / period as f64;

    // Wilder smoothing over the remaining changes
    for &change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_none_when_insufficient_data() {
        assert!(rsi(&[100.0; 14], 14).is_none());
        assert!(rsi(&[100.0; 30], 1).is_none());
    }

    #[test]
    fn rsi_some_with_exactly_period_plus_one() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&prices, 14).is_some());
    }

    #[test]
    fn rsi_saturates_at_100_on_pure_gains() {
        let prices = [10.0, 11.0, 12.0, 13.0, 14.0];
        let value = rsi(&prices, 3).unwrap();
        assert!((value - 100.0).abs() < 1e-6, "expected ~100, got {value}");
    }

    #[test]
    fn rsi_saturates_at_0_on_pure_losses() {
        let prices = [14.0, 13.0, 12.0, 11.0, 10.0];
        let value = rsi(&prices, 3).unwrap();
        assert!(value.abs() < 1e-6, "expected ~0, got {value}");
    }

    #[test]
    fn rsi_stays_in_range_on_mixed_series() {
        let prices = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83,
            45.10, 45.15, 44.34, 44.09,
        ];
        let value = rsi(&prices, 14).unwrap();
        assert!((0.0..=100.0).contains(&value), "RSI out of range: {value}");
    }
}
