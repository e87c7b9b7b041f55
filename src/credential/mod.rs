//! API key storage and verification

mod gate;
mod store;

pub use gate::*;
pub use store::*;
