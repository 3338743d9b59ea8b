//! Core algorithms: range-image projection, feature extraction, matching.

pub mod features;
pub mod matching;
pub mod projection;
