//! Sensing core for the Climber ground robot on no-std embedded platforms.
//!
//! Turns a 6-channel spectral sensor into a floor-color state and an array of
//! up to five VL53L4CX-class ranging sensors into per-slot obstacle distances.
//! Everything is driven from one cooperative loop; nothing in the per-cycle path
//! blocks.
//!
//! For a host simulation of the whole stack, see `climber-app/mock-mcu`.
#![no_std]

pub mod utils;
