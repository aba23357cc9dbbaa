//! Optimized-lookup (OL) finite state transducer engine.
//!
//! This crate loads precompiled weighted and unweighted OL transducer
//! binaries and runs lookup and spell-correction queries against them. The
//! packed format stores an automaton as two parallel tables sharing one
//! address space; see [`tables`] for the layout invariants.
//!
//! # Architecture
//!
//! - [`header`] -- Fixed-layout binary header (counts and property bits)
//! - [`flags`] -- Flag diacritic operations (P, N, R, D, C, U)
//! - [`alphabet`] -- Symbol table and distinguished symbols
//! - [`encoder`] -- Input tokenizer (ascii fast path + byte trie)
//! - [`tables`] -- Transition-index and transition tables, traversal primitives
//! - [`transducer`] -- Loading, serialization, the public query surface
//! - [`lookup`] -- Depth-first lookup with flag diacritics and cutoffs
//! - [`speller`] -- Error-model driven spell correction
//! - [`convert`] -- Packing an in-memory graph into OL tables

pub mod alphabet;
pub mod convert;
pub mod encoder;
pub mod flags;
pub mod header;
pub mod lookup;
pub mod speller;
pub mod tables;
pub mod transducer;

/// A symbol number: index into the alphabet's symbol table.
pub type SymbolNumber = u16;
/// An index into the shared index/transition table address space.
pub type TableIndex = u32;
/// A tropical weight; smaller is better.
pub type Weight = f32;

/// Sentinel for "no symbol": marks empty index cells and run terminators.
pub const NO_SYMBOL: SymbolNumber = SymbolNumber::MAX;
/// Sentinel for "no target".
pub const NO_TABLE_INDEX: TableIndex = TableIndex::MAX;
/// Table indices at or above this bias refer to the transition table;
/// indices below it refer to the transition-index table.
pub const TRANSITION_TARGET_TABLE_START: TableIndex = 1 << 31;
/// Weight used as an "unset" cutoff; worse than any real path weight.
pub const INFINITE_WEIGHT: Weight = NO_TABLE_INDEX as Weight;
/// Recursion budget for one query; exceeding it abandons the current path.
pub const MAX_RECURSION_DEPTH: u32 = 5000;
/// The deadline clock is sampled once per this many recursive calls.
pub const CLOCK_CHECK_INTERVAL: u32 = 1 << 14;

/// True if `i` addresses the transition table rather than the index table.
#[inline]
pub fn indexes_transition_table(i: TableIndex) -> bool {
    i >= TRANSITION_TARGET_TABLE_START
}

/// Error type for loading and querying OL transducers.
#[derive(Debug, thiserror::Error)]
pub enum OlError {
    #[error("bad transducer: {0}")]
    BadTransducer(String),
    #[error("file too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("error-model symbol {0:?} has no counterpart in the lexicon")]
    AlphabetTranslation(String),
    #[error("internal error: {0}")]
    FatalInternal(String),
    #[error("cannot exhaustively enumerate the paths of a cyclic transducer")]
    CyclicExtraction,
}
