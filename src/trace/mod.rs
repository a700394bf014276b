pub mod export;
pub mod recorder;
pub mod span;

pub use export::*;
pub use recorder::*;
pub use span::*;
