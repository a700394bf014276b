pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::*;
pub use retry::*;
