// Technical indicators module
// Pure functions over candle/price slices: momentum, trend, volatility, volume

pub mod momentum;
pub mod snapshot;
pub mod trend;
pub mod volatility;
pub mod volume;

pub use momentum::{calculate_macd, calculate_rsi, Macd};
pub use snapshot::{compute, IndicatorSnapshot};
pub use trend::{calculate_adx, calculate_ema, calculate_ema_series, calculate_sma, Adx};
pub use volatility::{calculate_atr, calculate_bollinger, BollingerBands};
pub use volume::{calculate_average_volume, calculate_volume_ratio};
