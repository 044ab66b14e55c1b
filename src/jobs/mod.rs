//! Handlers, one module per family of job types.

pub mod cleanup;
pub mod email;
pub mod payment;
pub mod reminder;
pub mod reports;
pub mod review;
