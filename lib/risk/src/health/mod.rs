pub use cache::*;

pub mod cache;
