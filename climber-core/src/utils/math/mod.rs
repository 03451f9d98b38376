//! Math utilities for the Climber sensing core.
//!
//! This module provides the spectral sample type together with the filtering,
//! shape-distance and color conversion routines the classifier is built on.

pub mod spectral;
