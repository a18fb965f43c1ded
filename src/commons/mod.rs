//! Common types used by the various docsign components.
pub mod actor;
pub mod api;
pub mod clock;
pub mod error;
pub mod file;

//------------ Response Aliases ----------------------------------------------

pub type DocsignEmptyResult = std::result::Result<(), self::error::Error>;
pub type DocsignResult<T> = std::result::Result<T, self::error::Error>;
