pub mod algorithms;
pub mod internal;
pub mod jobs;
pub mod stats;
