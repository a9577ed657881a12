pub mod demo;
pub mod todo;
