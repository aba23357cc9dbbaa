//! Pattern matching over recursive transducer networks.
//!
//! A [`PmatchContainer`] holds a toplevel transducer and a registry of named
//! subtransducers callable from one another through insertion symbols. The
//! interpreter scans a text left to right, runs the toplevel at each
//! position, and either rewrites the text (match mode) or reports structured
//! [`Location`] records (locate mode). Patterns can consult left and right
//! contexts (positive and negative), capture substrings for back-reference,
//! bump counters, raise global flags, and tag their output.
//!
//! # Architecture
//!
//! - [`alphabet`] -- The shared extended alphabet and its special symbols
//! - [`transducer`] -- Table access for one network member
//! - [`container`] -- The container, the scanner and the match interpreter
//! - [`location`] -- Locate-mode result records
//!
//! [`PmatchContainer`]: container::PmatchContainer
//! [`Location`]: location::Location

pub mod alphabet;
pub mod container;
pub mod location;
pub mod transducer;

pub use container::PmatchContainer;
pub use location::Location;

use louhi_fst::OlError;

/// Error type for building and loading pattern containers.
#[derive(Debug, thiserror::Error)]
pub enum PmatchError {
    #[error(transparent)]
    Transducer(#[from] OlError),
    #[error("pattern refers to {name:?} but no such transducer is loaded")]
    UnsatisfiedRtn { name: String },
    #[error("transducer {name:?} does not share the container alphabet")]
    AlphabetMismatch { name: String },
    #[error("bad container archive: {0}")]
    BadArchive(String),
}
