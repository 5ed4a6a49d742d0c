mod macd;
mod rsi;
mod sma;

pub use macd::{macd_cross, MacdCross};
pub use rsi::rsi;
pub use sma::sma;
