pub mod error;
pub mod heap;
pub mod simulator;

pub use error::RuntimeError;
pub use heap::Heap;
pub use simulator::{Report, simulate};
