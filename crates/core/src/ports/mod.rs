mod chain;
mod repository;

pub use chain::*;
pub use repository::*;
