//! Row structs and DTOs for the `algo_jobs` table.

pub mod job;
pub mod status;
