// The two parallel tables of a packed OL transducer.
//
// A state is a table index in a single address space: indices below
// TRANSITION_TARGET_TABLE_START name entries of the transition-index table,
// indices at or above it name entries of the transition table (minus the
// bias). An index-table state occupies a row: the cell at its base position
// carries finality, and the cell at base+1+k dispatches input symbol k into
// the transition table (flag diacritics share slot 0 with epsilon). A
// transition-table state is a boundary cell (a sentinel that carries
// finality) followed by a contiguous run of transitions grouped by input
// symbol and closed off by the next sentinel.

use crate::header::TransducerHeader;
use crate::{
    NO_SYMBOL, NO_TABLE_INDEX, OlError, SymbolNumber, TRANSITION_TARGET_TABLE_START, TableIndex,
    Weight, indexes_transition_table,
};
use bytemuck::{Pod, Zeroable};

/// Wire form of an index-table entry: 6 bytes, unaligned.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawIndex {
    input: u16,
    target: u32,
}

/// Wire form of an unweighted transition: 8 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawTransition {
    input: u16,
    output: u16,
    target: u32,
}

/// Wire form of a weighted transition: 12 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawWeightedTransition {
    input: u16,
    output: u16,
    target: u32,
    weight: f32,
}

const _: () = assert!(size_of::<RawIndex>() == 6);
const _: () = assert!(size_of::<RawTransition>() == 8);
const _: () = assert!(size_of::<RawWeightedTransition>() == 12);

/// Decoded index-table entry. For a final state cell the `target` field
/// holds the final weight's bit pattern (weighted) or 1 (unweighted); for an
/// empty cell it is `NO_TABLE_INDEX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionIndex {
    pub input: SymbolNumber,
    pub target: TableIndex,
}

impl TransitionIndex {
    pub const EMPTY: TransitionIndex = TransitionIndex {
        input: NO_SYMBOL,
        target: NO_TABLE_INDEX,
    };

    /// A state cell marking finality.
    pub fn final_cell(weight: Weight, weighted: bool) -> Self {
        TransitionIndex {
            input: NO_SYMBOL,
            target: if weighted { weight.to_bits() } else { 1 },
        }
    }

    pub fn matches(&self, symbol: SymbolNumber) -> bool {
        self.input == symbol
    }

    pub fn is_final(&self) -> bool {
        self.input == NO_SYMBOL && self.target != NO_TABLE_INDEX
    }
}

/// Decoded transition-table entry. Unweighted tables decode with weight 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub input: SymbolNumber,
    pub output: SymbolNumber,
    pub target: TableIndex,
    pub weight: Weight,
}

impl Transition {
    /// A boundary sentinel: final states carry target 1 and their final
    /// weight, non-final states carry no target at all.
    pub fn boundary(is_final: bool, weight: Weight) -> Self {
        Transition {
            input: NO_SYMBOL,
            output: NO_SYMBOL,
            target: if is_final { 1 } else { NO_TABLE_INDEX },
            weight,
        }
    }

    pub fn matches(&self, symbol: SymbolNumber) -> bool {
        self.input == symbol
    }

    pub fn is_final(&self) -> bool {
        self.input == NO_SYMBOL && self.output == NO_SYMBOL && self.target == 1
    }
}

/// A transition yielded by a single-step traversal primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct STransition {
    pub index: TableIndex,
    pub symbol: SymbolNumber,
    pub weight: Weight,
}

/// Both tables of one transducer, decoded into aligned memory.
#[derive(Debug, Clone)]
pub struct TransducerTables {
    indices: Vec<TransitionIndex>,
    transitions: Vec<Transition>,
    weighted: bool,
}

impl TransducerTables {
    pub fn new(
        indices: Vec<TransitionIndex>,
        transitions: Vec<Transition>,
        weighted: bool,
    ) -> Self {
        Self {
            indices,
            transitions,
            weighted,
        }
    }

    /// Decode both tables from `data` starting at `pos`, with sizes and the
    /// record width taken from the header.
    pub fn from_bytes(
        data: &[u8],
        pos: usize,
        header: &TransducerHeader,
    ) -> Result<(Self, usize), OlError> {
        let index_count = header.index_table_size as usize;
        let transition_count = header.transition_table_size as usize;
        let transition_width = if header.weighted {
            size_of::<RawWeightedTransition>()
        } else {
            size_of::<RawTransition>()
        };
        let needed = pos
            + index_count * size_of::<RawIndex>()
            + transition_count * transition_width;
        if needed > data.len() {
            return Err(OlError::TooShort {
                expected: needed,
                actual: data.len(),
            });
        }

        // RawIndex is unaligned (packed), so it casts straight off the slice.
        let index_bytes = &data[pos..pos + index_count * size_of::<RawIndex>()];
        let indices = bytemuck::cast_slice::<u8, RawIndex>(index_bytes)
            .iter()
            .map(|raw| TransitionIndex {
                input: raw.input,
                target: raw.target,
            })
            .collect();

        let mut pos = pos + index_count * size_of::<RawIndex>();
        let transition_bytes = &data[pos..pos + transition_count * transition_width];
        pos += transition_count * transition_width;

        // The transition records are 4-byte aligned types; copy them into an
        // owned buffer since the source slice carries no alignment guarantee.
        let transitions = if header.weighted {
            let mut raw = vec![RawWeightedTransition::zeroed(); transition_count];
            bytemuck::cast_slice_mut::<RawWeightedTransition, u8>(&mut raw)
                .copy_from_slice(transition_bytes);
            raw.iter()
                .map(|t| Transition {
                    input: t.input,
                    output: t.output,
                    target: t.target,
                    weight: t.weight,
                })
                .collect()
        } else {
            let mut raw = vec![RawTransition::zeroed(); transition_count];
            bytemuck::cast_slice_mut::<RawTransition, u8>(&mut raw)
                .copy_from_slice(transition_bytes);
            raw.iter()
                .map(|t| Transition {
                    input: t.input,
                    output: t.output,
                    target: t.target,
                    weight: 0.0,
                })
                .collect()
        };

        Ok((
            Self {
                indices,
                transitions,
                weighted: header.weighted,
            },
            pos,
        ))
    }

    /// Append the wire form of both tables to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        for index in &self.indices {
            out.extend_from_slice(&index.input.to_le_bytes());
            out.extend_from_slice(&index.target.to_le_bytes());
        }
        for transition in &self.transitions {
            out.extend_from_slice(&transition.input.to_le_bytes());
            out.extend_from_slice(&transition.output.to_le_bytes());
            out.extend_from_slice(&transition.target.to_le_bytes());
            if self.weighted {
                out.extend_from_slice(&transition.weight.to_le_bytes());
            }
        }
    }

    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    pub fn index_table(&self) -> &[TransitionIndex] {
        &self.indices
    }

    pub fn transition_table(&self) -> &[Transition] {
        &self.transitions
    }

    /// The index-table entry at unbiased position `i`.
    pub fn index(&self, i: TableIndex) -> &TransitionIndex {
        &self.indices[i as usize]
    }

    /// The transition at `i`, accepting both biased and unbiased positions.
    pub fn transition(&self, i: TableIndex) -> &Transition {
        let i = if indexes_transition_table(i) {
            i - TRANSITION_TARGET_TABLE_START
        } else {
            i
        };
        &self.transitions[i as usize]
    }

    /// Finality of the state at table index `i`, dispatching on the bias.
    pub fn is_final(&self, i: TableIndex) -> bool {
        if indexes_transition_table(i) {
            self.transition(i).is_final()
        } else {
            self.index(i).is_final()
        }
    }

    /// Final weight of the state at `i`; 0 for unweighted tables.
    pub fn final_weight(&self, i: TableIndex) -> Weight {
        if indexes_transition_table(i) {
            self.transition(i).weight
        } else if self.weighted {
            Weight::from_bits(self.index(i).target)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(weighted: bool, indices: u32, transitions: u32) -> TransducerHeader {
        TransducerHeader {
            input_symbol_count: 2,
            symbol_count: 3,
            index_table_size: indices,
            transition_table_size: transitions,
            state_count: 2,
            transition_count: 1,
            weighted,
            deterministic: true,
            input_deterministic: true,
            minimized: true,
            cyclic: false,
            has_epsilon_epsilon_transitions: false,
            has_input_epsilon_transitions: false,
            has_input_epsilon_cycles: false,
            has_unweighted_input_epsilon_cycles: false,
        }
    }

    fn sample_tables(weighted: bool) -> TransducerTables {
        TransducerTables::new(
            vec![
                TransitionIndex::final_cell(0.5, weighted),
                TransitionIndex {
                    input: 1,
                    target: TRANSITION_TARGET_TABLE_START + 1,
                },
                TransitionIndex::EMPTY,
            ],
            vec![
                Transition::boundary(false, 0.0),
                Transition {
                    input: 1,
                    output: 2,
                    target: TRANSITION_TARGET_TABLE_START,
                    weight: if weighted { 1.5 } else { 0.0 },
                },
                Transition::boundary(true, if weighted { 0.25 } else { 0.0 }),
            ],
            weighted,
        )
    }

    #[test]
    fn index_finality() {
        assert!(TransitionIndex::final_cell(0.0, true).is_final());
        assert!(TransitionIndex::final_cell(0.0, false).is_final());
        assert!(!TransitionIndex::EMPTY.is_final());
        assert!(
            !TransitionIndex {
                input: 3,
                target: TRANSITION_TARGET_TABLE_START,
            }
            .is_final()
        );
    }

    #[test]
    fn transition_finality() {
        assert!(Transition::boundary(true, 2.0).is_final());
        assert!(!Transition::boundary(false, 0.0).is_final());
        assert!(
            !Transition {
                input: 1,
                output: 1,
                target: 1,
                weight: 0.0,
            }
            .is_final()
        );
    }

    #[test]
    fn dispatch_on_bias() {
        let tables = sample_tables(true);
        // Unbiased: index table. Biased: transition table.
        assert!(tables.is_final(0));
        assert!((tables.final_weight(0) - 0.5).abs() < f32::EPSILON);
        assert!(!tables.is_final(TRANSITION_TARGET_TABLE_START));
        assert!(tables.is_final(TRANSITION_TARGET_TABLE_START + 2));
        assert!((tables.final_weight(TRANSITION_TARGET_TABLE_START + 2) - 0.25).abs()
            < f32::EPSILON);
    }

    #[test]
    fn weighted_round_trip() {
        let tables = sample_tables(true);
        let mut buf = Vec::new();
        tables.write(&mut buf);
        assert_eq!(buf.len(), 3 * 6 + 3 * 12);

        let header = sample_header(true, 3, 3);
        let (parsed, end) = TransducerTables::from_bytes(&buf, 0, &header).unwrap();
        assert_eq!(end, buf.len());
        assert_eq!(parsed.index_table(), tables.index_table());
        assert_eq!(parsed.transition_table(), tables.transition_table());
    }

    #[test]
    fn unweighted_round_trip_drops_weights() {
        let tables = sample_tables(false);
        let mut buf = Vec::new();
        tables.write(&mut buf);
        assert_eq!(buf.len(), 3 * 6 + 3 * 8);

        let header = sample_header(false, 3, 3);
        let (parsed, _) = TransducerTables::from_bytes(&buf, 0, &header).unwrap();
        assert_eq!(parsed.index_table(), tables.index_table());
        assert_eq!(parsed.transition_table(), tables.transition_table());
        assert_eq!(parsed.final_weight(TRANSITION_TARGET_TABLE_START + 2), 0.0);
    }

    #[test]
    fn reject_truncated_tables() {
        let tables = sample_tables(true);
        let mut buf = Vec::new();
        tables.write(&mut buf);
        buf.pop();

        let header = sample_header(true, 3, 3);
        assert!(matches!(
            TransducerTables::from_bytes(&buf, 0, &header),
            Err(OlError::TooShort { .. })
        ));
    }

    #[test]
    fn decode_at_offset() {
        let tables = sample_tables(true);
        let mut buf = vec![0xAA; 13];
        tables.write(&mut buf);
        let header = sample_header(true, 3, 3);
        let (parsed, end) = TransducerTables::from_bytes(&buf, 13, &header).unwrap();
        assert_eq!(end, buf.len());
        assert_eq!(parsed.index_table(), tables.index_table());
    }
}
