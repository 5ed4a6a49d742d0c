/// Crossover state of the MACD line against its signal line on the
/// latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdCross {
    Bullish,
    Bearish,
    Neutral,
}

/// MACD crossover detection over close prices (oldest first).
///
/// MACD line = EMA(fast) − EMA(slow); signal line = EMA of the MACD line.
/// Returns `None` until `slow + signal` prices are available or when the
/// periods are degenerate (`fast >= slow`).
pub fn macd_cross(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdCross> {
    if fast == 0 || signal == 0 || fast >= slow || closes.len() < slow + signal {
        return None;
    }

    // MACD line for the last `signal + 1` bars (previous + current)
    let series_len = signal + 1;
    let start = closes.len().saturating_sub(slow + series_len - 1);
    let window = &closes[start..];

    let macd_line: Vec<f64> = (slow - 1..window.len())
        .map(|i| {
            let slice = &window[..=i];
            ema(slice, fast) - ema(slice, slow)
        })
        .collect();
    if macd_line.len() < signal + 1 {
        return None;
    }

    let signal_line: Vec<f64> = (signal - 1..macd_line.len())
        .map(|i| ema(&macd_line[..=i], signal))
        .collect();
    if signal_line.len() < 2 {
        return None;
    }

    let prev_macd = macd_line[macd_line.len() - 2];
    let curr_macd = macd_line[macd_line.len() - 1];
    let prev_sig = signal_line[signal_line.len() - 2];
    let curr_sig = signal_line[signal_line.len() - 1];

    if prev_macd <= prev_sig && curr_macd > curr_sig {
        Some(MacdCross::Bullish)
    } else if prev_macd >= prev_sig && curr_macd < curr_sig {
        Some(MacdCross::Bearish)
    } else {
        Some(MacdCross::Neutral)
    }
}

/// Exponential moving average of the tail of `data`, seeded with an SMA of
/// the first `period` values.
fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() || period == 0 {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let start = data.len().saturating_sub(period * 3);
    let slice = &data[start..];

    let seed_len = period.min(slice.len());
    let mut value: f64 = slice[..seed_len].iter().sum::<f64>() / seed_len as f64;
    for &price in &slice[seed_len..] {
        value = price * k + value * (1.0 - k);
    }
    value
}
