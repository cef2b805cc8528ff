pub mod base;
pub mod boundary;
pub mod consensus;
pub mod error;
pub mod io;
pub mod nw;
pub mod paired;
pub mod pipeline;
