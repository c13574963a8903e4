//! Search execution: the session manager and the blocking worker that
//! drives one search to a terminal event.

pub mod sessions;
pub mod worker;
