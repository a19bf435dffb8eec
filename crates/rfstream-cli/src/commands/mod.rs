//! CLI command implementations.

pub mod common;
pub mod dump;
pub mod encode;
pub mod info;
pub mod render;
pub mod run;
