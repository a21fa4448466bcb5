//! Block production

pub mod producer;

pub use producer::Producer;
