//! Application services coordinating the cache engine and its collaborators.

pub mod error;
pub mod popular;
pub mod repos;
