use common::{Bar, Error, Result, Signal, SignalKind};

use crate::indicators::{macd_cross, rsi, sma, MacdCross};

/// The uniform signal-extraction seam every strategy engine satisfies.
///
/// Engines are pure computations over a bar buffer: no I/O, no interior
/// state. Ordinary market conditions (including "not enough history yet")
/// come back as HOLD signals; an `Err` is reserved for genuinely broken
/// inputs and is downgraded to HOLD at the pool boundary.
pub trait SignalEngine: Send + Sync {
    /// Bars required before the engine can say anything meaningful.
    fn lookback(&self) -> usize;

    /// Extract one signal from the buffer (oldest bar first).
    fn extract_signal(&self, bars: &[Bar]) -> Result<Signal>;
}

fn last_bar<'a>(bars: &'a [Bar]) -> Result<&'a Bar> {
    bars.last()
        .ok_or_else(|| Error::Engine("no bars in buffer".into()))
}

fn warming_up(bar: &Bar, have: usize, need: usize) -> Signal {
    Signal::hold(&bar.symbol, bar.close).with_note(format!("warming up: {have}/{need} bars"))
}

// ─── SMA crossover ────────────────────────────────────────────────────────────

/// Golden/death cross of two simple moving averages.
pub struct SmaCrossEngine {
    short: usize,
    long: usize,
}

impl SmaCrossEngine {
    pub fn new(short: usize, long: usize) -> Result<Self> {
        if short == 0 || short >= long {
            return Err(Error::Definition(format!(
                "sma-cross needs 0 < short < long, got {short}/{long}"
            )));
        }
        Ok(Self { short, long })
    }
}

impl SignalEngine for SmaCrossEngine {
    fn lookback(&self) -> usize {
        // One extra bar so the previous tick's averages exist too
        self.long + 1
    }

    fn extract_signal(&self, bars: &[Bar]) -> Result<Signal> {
        let last = last_bar(bars)?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        if closes.len() < self.lookback() {
            return Ok(warming_up(last, closes.len(), self.lookback()));
        }

        let prev = &closes[..closes.len() - 1];
        let cross = sma(prev, self.short)
            .zip(sma(prev, self.long))
            .zip(sma(&closes, self.short).zip(sma(&closes, self.long)));
        let ((prev_short, prev_long), (curr_short, curr_long)) = match cross {
            Some(values) => values,
            None => return Ok(warming_up(last, closes.len(), self.lookback())),
        };

        let spread = ((curr_short - curr_long).abs() / curr_long.abs().max(f64::EPSILON))
            .clamp(0.05, 1.0);
        let signal = if prev_short <= prev_long && curr_short > curr_long {
            Signal::new(&last.symbol, SignalKind::Buy, last.close, spread)
                .with_note("sma golden cross")
        } else if prev_short >= prev_long && curr_short < curr_long {
            Signal::new(&last.symbol, SignalKind::Sell, last.close, spread)
                .with_note("sma death cross")
        } else {
            Signal::hold(&last.symbol, last.close)
        };
        Ok(signal)
    }
}

// ─── RSI ──────────────────────────────────────────────────────────────────────

/// Mean-reversion on RSI extremes: buy oversold, sell overbought.
pub struct RsiEngine {
    period: usize,
    overbought: f64,
    oversold: f64,
}

impl RsiEngine {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self> {
        if period < 2 {
            return Err(Error::Definition(format!("rsi period must be >= 2, got {period}")));
        }
        if oversold >= overbought || !(0.0..=100.0).contains(&oversold) || overbought > 100.0 {
            return Err(Error::Definition(format!(
                "rsi thresholds must satisfy 0 <= oversold < overbought <= 100, got {oversold}/{overbought}"
            )));
        }
        Ok(Self { period, overbought, oversold })
    }
}

impl SignalEngine for RsiEngine {
    fn lookback(&self) -> usize {
        self.period + 1
    }

    fn extract_signal(&self, bars: &[Bar]) -> Result<Signal> {
        let last = last_bar(bars)?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let value = match rsi(&closes, self.period) {
            Some(v) => v,
            None => return Ok(warming_up(last, closes.len(), self.lookback())),
        };

        let signal = if value <= self.oversold {
            let confidence =
                ((self.oversold - value) / self.oversold.max(f64::EPSILON)).clamp(0.2, 1.0);
            Signal::new(&last.symbol, SignalKind::Buy, last.close, confidence)
                .with_note(format!("rsi {value:.1} oversold"))
        } else if value >= self.overbought {
            let confidence = ((value - self.overbought) / (100.0 - self.overbought).max(f64::EPSILON))
                .clamp(0.2, 1.0);
            Signal::new(&last.symbol, SignalKind::Sell, last.close, confidence)
                .with_note(format!("rsi {value:.1} overbought"))
        } else {
            Signal::hold(&last.symbol, last.close)
        };
        Ok(signal)
    }
}

// ─── MACD momentum ────────────────────────────────────────────────────────────

/// Trade MACD line / signal line crossovers.
pub struct MacdEngine {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl MacdEngine {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(Error::Definition(format!(
                "macd needs 0 < fast < slow and signal > 0, got {fast}/{slow}/{signal}"
            )));
        }
        Ok(Self { fast, slow, signal })
    }
}

impl SignalEngine for MacdEngine {
    fn lookback(&self) -> usize {
        self.slow + self.signal
    }

    fn extract_signal(&self, bars: &[Bar]) -> Result<Signal> {
        let last = last_bar(bars)?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let cross = match macd_cross(&closes, self.fast, self.slow, self.signal) {
            Some(c) => c,
            None => return Ok(warming_up(last, closes.len(), self.lookback())),
        };

        let signal = match cross {
            MacdCross::Bullish => Signal::new(&last.symbol, SignalKind::Buy, last.close, 0.6)
                .with_note("macd bullish crossover"),
            MacdCross::Bearish => Signal::new(&last.symbol, SignalKind::Sell, last.close, 0.6)
                .with_note("macd bearish crossover"),
            MacdCross::Neutral => Signal::hold(&last.symbol, last.close),
        };
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| Bar::flat("TEST", c, Utc::now()))
            .collect()
    }

    #[test]
    fn engines_hold_while_warming_up() {
        let engine = SmaCrossEngine::new(2, 5).unwrap();
        let signal = engine.extract_signal(&bars(&[1.0, 2.0, 3.0])).unwrap();
        assert!(signal.is_hold());
        assert!(signal.note.unwrap().contains("warming up"));
    }

    #[test]
    fn engines_error_on_empty_buffer() {
        let engine = RsiEngine::new(14, 70.0, 30.0).unwrap();
        assert!(engine.extract_signal(&[]).is_err());
    }

    #[test]
    fn sma_cross_emits_buy_on_golden_cross() {
        let engine = SmaCrossEngine::new(2, 4).unwrap();
        // Short average crosses above long on the final bar:
        // prev tick short (4+5)/2 = 4.5 <= long (6+5+4+5)/4 = 5.0,
        // curr tick short (5+12)/2 = 8.5 > long (5+4+5+12)/4 = 6.5
        let series = [10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 5.0, 12.0];
        let signal = engine.extract_signal(&bars(&series)).unwrap();
        assert_eq!(signal.kind, SignalKind::Buy);
        assert!(signal.confidence > 0.0);
    }

    #[test]
    fn sma_cross_emits_sell_on_death_cross() {
        let engine = SmaCrossEngine::new(2, 4).unwrap();
        // Mirror of the golden-cross series
        let series = [2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 7.0, 0.5];
        let signal = engine.extract_signal(&bars(&series)).unwrap();
        assert_eq!(signal.kind, SignalKind::Sell);
    }

    #[test]
    fn rsi_engine_buys_oversold() {
        let engine = RsiEngine::new(3, 70.0, 30.0).unwrap();
        let series = [20.0, 19.0, 18.0, 17.0, 16.0, 15.0];
        let signal = engine.extract_signal(&bars(&series)).unwrap();
        assert_eq!(signal.kind, SignalKind::Buy);
    }

    #[test]
    fn rsi_engine_sells_overbought() {
        let engine = RsiEngine::new(3, 70.0, 30.0).unwrap();
        let series = [15.0, 16.0, 17.0, 18.0, 19.0, 20.0];
        let signal = engine.extract_signal(&bars(&series)).unwrap();
        assert_eq!(signal.kind, SignalKind::Sell);
    }

    #[test]
    fn engine_constructors_validate_parameters() {
        assert!(SmaCrossEngine::new(5, 5).is_err());
        assert!(SmaCrossEngine::new(0, 5).is_err());
        assert!(RsiEngine::new(1, 70.0, 30.0).is_err());
        assert!(RsiEngine::new(14, 30.0, 70.0).is_err());
        assert!(MacdEngine::new(26, 12, 9).is_err());
        assert!(MacdEngine::new(12, 26, 0).is_err());
    }
}
