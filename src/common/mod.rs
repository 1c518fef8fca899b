pub mod bytes;
pub mod config;
pub mod error;
pub mod file;
pub mod header;
pub mod media;
pub mod picture;
pub mod sandwich;
pub mod stream;
pub mod tag;
