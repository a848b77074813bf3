//! Frame source implementations

mod replay;
mod still;

pub use replay::ReplaySource;
pub use still::StaticSource;
