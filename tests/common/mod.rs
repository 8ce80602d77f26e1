#![allow(dead_code)]

pub mod cluster;
pub mod identity;
pub mod strategies;

pub use cluster::*;
pub use identity::*;
pub use strategies::*;
