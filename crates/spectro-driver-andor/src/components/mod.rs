//! Building blocks of the session: device ownership, mode transitions,
//! acquisition polling, settings and the published state snapshot.

pub mod acquisition;
pub(crate) mod connection;
pub(crate) mod modes;
pub mod settings;
pub mod state;
