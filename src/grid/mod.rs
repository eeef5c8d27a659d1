pub mod cell;
pub mod error;
pub mod index;
pub mod manifest;
