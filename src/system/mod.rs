//! Facts about the machines under test, gathered through their shells.

pub mod distro;
pub mod network;
