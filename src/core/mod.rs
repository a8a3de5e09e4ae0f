pub mod error;
pub mod union_find;
pub mod volume;
