pub mod evaluator;
pub mod notify;
pub mod rules;

pub use evaluator::*;
pub use notify::*;
pub use rules::*;
