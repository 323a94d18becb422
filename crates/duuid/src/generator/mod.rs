mod atomic;
mod buffered;
mod facade;
mod interface;
mod stats;
#[cfg(test)]
mod tests;

pub use atomic::*;
pub use buffered::*;
pub use facade::*;
pub use interface::*;
pub use stats::*;
