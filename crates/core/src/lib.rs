//! Domain types and pure logic shared by every camview crate.
//!
//! Nothing in here touches the network or the database, so the window
//! splitter, cursor arithmetic and timestamp disambiguation can be tested
//! in isolation and reused by the scanner, the worker and the repositories.

pub mod device;
pub mod error;
pub mod media;
pub mod scan;
pub mod types;
pub mod unique_time;
