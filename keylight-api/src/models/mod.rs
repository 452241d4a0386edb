mod accessory;
mod light;

pub use accessory::*;
pub use light::*;
