// Loading, serialization and the public query surface of one transducer.

use crate::alphabet::TransducerAlphabet;
use crate::encoder::Encoder;
use crate::header::TransducerHeader;
use crate::lookup::{LookupConfig, LookupContext, LookupPath, LookupResult};
use crate::tables::{STransition, TransducerTables};
use crate::{NO_SYMBOL, OlError, SymbolNumber, TableIndex, Weight, indexes_transition_table};

/// A compiled transducer, immutable after construction. Queries allocate
/// their own transient state; sharing a `Transducer` across threads needs no
/// synchronization.
#[derive(Debug, Clone)]
pub struct Transducer {
    header: TransducerHeader,
    alphabet: TransducerAlphabet,
    tables: TransducerTables,
    encoder: Encoder,
}

impl Transducer {
    /// Load a transducer from its binary serialization. Trailing bytes after
    /// the tables are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, OlError> {
        let (header, pos) = TransducerHeader::from_bytes(data)?;
        let (alphabet, pos) = TransducerAlphabet::from_bytes(data, pos, header.symbol_count)?;
        let (tables, _) = TransducerTables::from_bytes(data, pos, &header)?;
        Self::from_parts(header, alphabet, tables)
    }

    /// Assemble a transducer from decoded parts, validating table targets.
    pub fn from_parts(
        header: TransducerHeader,
        alphabet: TransducerAlphabet,
        tables: TransducerTables,
    ) -> Result<Self, OlError> {
        let index_count = tables.index_table().len() as u64;
        let transition_count = tables.transition_table().len() as u64;
        if let Some(last) = tables.transition_table().last()
            && last.input != NO_SYMBOL
        {
            return Err(OlError::BadTransducer(
                "transition table does not end in a sentinel".to_string(),
            ));
        }
        // A state target must leave room for the run following its boundary
        // cell; an index-cell target points straight at a run cell.
        let check_target = |target: TableIndex, is_state: bool| -> bool {
            if indexes_transition_table(target) {
                let rel = u64::from(target - crate::TRANSITION_TARGET_TABLE_START);
                if is_state { rel + 1 < transition_count } else { rel < transition_count }
            } else {
                u64::from(target) + 1 < index_count
            }
        };
        for cell in tables.index_table() {
            if cell.input != NO_SYMBOL
                && (!indexes_transition_table(cell.target) || !check_target(cell.target, false))
            {
                return Err(OlError::BadTransducer(format!(
                    "index entry targets out-of-range position {}",
                    cell.target
                )));
            }
        }
        for transition in tables.transition_table() {
            if transition.input != NO_SYMBOL && !check_target(transition.target, true) {
                return Err(OlError::BadTransducer(format!(
                    "transition targets out-of-range position {}",
                    transition.target
                )));
            }
        }

        let encoder = Encoder::new(&alphabet, header.input_symbol_count);
        Ok(Self {
            header,
            alphabet,
            tables,
            encoder,
        })
    }

    /// Append the binary serialization to `out`. Reading it back yields a
    /// transducer with identical header, alphabet and tables.
    pub fn write(&self, out: &mut Vec<u8>) {
        self.header.write(out);
        self.alphabet.write(out);
        self.tables.write(out);
    }

    pub fn header(&self) -> &TransducerHeader {
        &self.header
    }

    pub fn alphabet(&self) -> &TransducerAlphabet {
        &self.alphabet
    }

    pub fn tables(&self) -> &TransducerTables {
        &self.tables
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn is_weighted(&self) -> bool {
        self.header.weighted
    }

    /// Advisory: the header's epsilon-cycle bit. Termination never relies on
    /// it; the lookup engine's epsilon-visit set is what cuts loops.
    pub fn is_infinitely_ambiguous(&self) -> bool {
        self.header.has_input_epsilon_cycles
    }

    pub fn is_flag(&self, symbol: SymbolNumber) -> bool {
        self.alphabet.is_flag_diacritic(symbol)
    }

    // ------------------------------------------------------------------
    // Traversal primitives. A *state position* is what transition targets
    // carry: an index-table base or a biased boundary cell. A *cursor* is a
    // biased position inside a transition run, advanced by one per step.
    // ------------------------------------------------------------------

    pub fn is_final(&self, i: TableIndex) -> bool {
        self.tables.is_final(i)
    }

    pub fn final_weight(&self, i: TableIndex) -> Weight {
        self.tables.final_weight(i)
    }

    /// Cursor to the transitions for input `symbol` from the state at `i`,
    /// or `None` when the state has no such group.
    pub fn next(&self, i: TableIndex, symbol: SymbolNumber) -> Option<TableIndex> {
        if indexes_transition_table(i) {
            return Some(i + 1);
        }
        let pos = i as usize + 1 + symbol as usize;
        let cell = self.tables.index_table().get(pos)?;
        if cell.matches(symbol) {
            Some(cell.target)
        } else {
            None
        }
    }

    /// Cursor to the epsilon-and-flag group of the state at `i`.
    pub fn next_e(&self, i: TableIndex) -> Option<TableIndex> {
        if indexes_transition_table(i) {
            return Some(i + 1);
        }
        let cell = self.tables.index_table().get(i as usize + 1)?;
        if cell.input == 0 {
            Some(cell.target)
        } else {
            None
        }
    }

    /// The epsilon transition at the cursor, if that is what lives there.
    pub fn take_epsilons(&self, cursor: TableIndex) -> Option<STransition> {
        let t = self.tables.transition(cursor);
        if t.input != 0 {
            return None;
        }
        Some(STransition {
            index: t.target,
            symbol: t.output,
            weight: t.weight,
        })
    }

    /// The epsilon or flag diacritic transition at the cursor. The yielded
    /// symbol is the output symbol; for flags that is the flag itself.
    pub fn take_epsilons_and_flags(&self, cursor: TableIndex) -> Option<STransition> {
        let t = self.tables.transition(cursor);
        if t.input != 0 && !self.is_flag(t.input) {
            return None;
        }
        Some(STransition {
            index: t.target,
            symbol: t.output,
            weight: t.weight,
        })
    }

    /// The transition at the cursor if its input is `symbol`.
    pub fn take_non_epsilons(&self, cursor: TableIndex, symbol: SymbolNumber) -> Option<STransition> {
        let t = self.tables.transition(cursor);
        if t.input != symbol {
            return None;
        }
        Some(STransition {
            index: t.target,
            symbol: t.output,
            weight: t.weight,
        })
    }

    pub fn has_transitions(&self, i: TableIndex, symbol: SymbolNumber) -> bool {
        if indexes_transition_table(i) {
            self.tables.transition(i + 1).matches(symbol)
        } else {
            let pos = i as usize + 1 + symbol as usize;
            self.tables
                .index_table()
                .get(pos)
                .is_some_and(|cell| cell.matches(symbol))
        }
    }

    pub fn has_epsilons_or_flags(&self, i: TableIndex) -> bool {
        if indexes_transition_table(i) {
            let t = self.tables.transition(i + 1);
            t.input == 0 || self.is_flag(t.input)
        } else {
            self.tables.index(i + 1).input == 0
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Tokenize `input` and enumerate its analyses, honoring flag
    /// diacritics. `limit` ≤ 0 means all; `time_cutoff` is seconds, 0 for
    /// none. Results come in depth-first discovery order.
    pub fn lookup(&self, input: &str, limit: isize, time_cutoff: f64) -> Vec<LookupResult> {
        self.lookup_with(
            input,
            &LookupConfig {
                limit,
                time_cutoff,
                ..LookupConfig::default()
            },
        )
    }

    pub fn lookup_with(&self, input: &str, config: &LookupConfig) -> Vec<LookupResult> {
        LookupContext::new(self, input, config).run_lookup()
    }

    /// Like [`lookup`](Self::lookup), but keeps the symbol-pair tape of each
    /// path instead of flattening it to an output string.
    pub fn lookup_pairs(&self, input: &str, limit: isize, time_cutoff: f64) -> Vec<LookupPath> {
        let config = LookupConfig {
            limit,
            time_cutoff,
            ..LookupConfig::default()
        };
        LookupContext::new(self, input, &config).run_lookup_pairs()
    }

    /// Whether an epsilon cycle is reachable while reading `input`, which
    /// would make exhaustive enumeration infinite without the cycle cut.
    pub fn is_lookup_infinitely_ambiguous(&self, input: &str) -> bool {
        LookupContext::new(self, input, &LookupConfig::default()).find_loop()
    }

    /// Exhaustively enumerate every accepted path as weighted symbol pairs.
    /// A cyclic transducer has unboundedly many paths and is refused.
    pub fn enumerate_paths(&self) -> Result<Vec<LookupPath>, OlError> {
        if self.header.cyclic {
            return Err(OlError::CyclicExtraction);
        }
        let mut paths = Vec::new();
        let mut pairs = Vec::new();
        self.walk_paths(0, 0.0, &mut pairs, &mut paths, crate::MAX_RECURSION_DEPTH)?;
        Ok(paths)
    }

    fn walk_paths(
        &self,
        i: TableIndex,
        weight: Weight,
        pairs: &mut Vec<(SymbolNumber, SymbolNumber)>,
        paths: &mut Vec<LookupPath>,
        depth_left: u32,
    ) -> Result<(), OlError> {
        // The cyclicity bit is advisory; running out of depth in an
        // allegedly acyclic machine means it lied.
        if depth_left == 0 {
            return Err(OlError::CyclicExtraction);
        }
        if self.is_final(i) {
            paths.push(LookupPath {
                weight: weight + self.final_weight(i),
                pairs: pairs
                    .iter()
                    .map(|&(input, output)| {
                        (
                            self.alphabet.string_from_symbol(input).to_string(),
                            self.alphabet.string_from_symbol(output).to_string(),
                        )
                    })
                    .collect(),
            });
        }
        for (symbol, mut cursor) in self.state_groups(i) {
            loop {
                let tr = *self.tables.transition(cursor);
                // Flag diacritics share the epsilon slot of an index row.
                let in_group = tr.input == symbol
                    || (symbol == 0 && self.alphabet.is_flag_diacritic(tr.input));
                if !in_group {
                    break;
                }
                pairs.push((tr.input, tr.output));
                self.walk_paths(tr.target, weight + tr.weight, pairs, paths, depth_left - 1)?;
                pairs.pop();
                cursor += 1;
            }
        }
        Ok(())
    }

    /// Transition groups leaving the state at `i`: `(input symbol, cursor)`.
    fn state_groups(&self, i: TableIndex) -> Vec<(SymbolNumber, TableIndex)> {
        let mut groups = Vec::new();
        if indexes_transition_table(i) {
            let mut cursor = i + 1;
            let mut current = NO_SYMBOL;
            loop {
                let tr = self.tables.transition(cursor);
                if tr.input == NO_SYMBOL {
                    break;
                }
                if tr.input != current {
                    current = tr.input;
                    groups.push((current, cursor));
                }
                cursor += 1;
            }
        } else {
            for symbol in 0..self.alphabet.symbol_count() {
                let pos = i as usize + 1 + symbol as usize;
                if let Some(cell) = self.tables.index_table().get(pos)
                    && cell.matches(symbol)
                {
                    groups.push((symbol, cell.target));
                }
            }
        }
        groups
    }
}
