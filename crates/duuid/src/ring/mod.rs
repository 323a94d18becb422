mod buffer;
mod producer;

pub use buffer::*;
pub use producer::*;
