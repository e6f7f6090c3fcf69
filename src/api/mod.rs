// Concrete collaborators: exchange REST client and AI analysis provider
pub mod binance;
pub mod openai;

pub use binance::{BinanceCredentials, BinanceFuturesClient, BINANCE_FUTURES_BASE};
pub use openai::{OpenAiAnalysisProvider, DEFAULT_MODEL, OPENAI_API_BASE};
