mod day_epoch;
mod interface;
mod system;

pub use day_epoch::*;
pub use interface::*;
pub use system::*;
