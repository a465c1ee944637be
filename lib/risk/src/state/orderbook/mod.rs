pub use book_builder::*;
pub use bookside::*;
pub use bookside_iterator::*;
pub use nodes::*;
pub use order_type::*;

pub mod book_builder;
pub mod bookside;
pub mod bookside_iterator;
pub mod nodes;
pub mod order_type;
