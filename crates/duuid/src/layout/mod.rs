mod codec;
mod id;

pub use codec::*;
pub use id::*;
