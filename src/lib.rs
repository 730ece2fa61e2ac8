//! geoenrich — adds coordinates to tables of free-text location descriptions,
//! memoising every lookup so repeated runs stay cheap.

pub mod batch;
pub mod config;
pub mod location;
