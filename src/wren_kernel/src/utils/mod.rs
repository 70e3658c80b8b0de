//! Utility
//!
//! **This module is exempt from the API stability guarantee** unless specified
//! otherwise. It's exposed only because it's needed by macros.
mod ctz;
mod init;
mod rawcell;
pub(crate) use self::ctz::*;
pub use self::{init::*, rawcell::*};
