// Depth-first lookup: epsilons, flag diacritics, unknown/identity/default
// handling, and the four conjunctive cutoffs.

use crate::flags::FdState;
use crate::transducer::Transducer;
use crate::{
    CLOCK_CHECK_INTERVAL, INFINITE_WEIGHT, MAX_RECURSION_DEPTH, NO_SYMBOL, SymbolNumber,
    TableIndex, Weight, indexes_transition_table,
};
use hashbrown::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Cutoffs for one lookup call. All limits apply in conjunction; hitting one
/// truncates the result set silently.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Maximum number of distinct results; zero or negative means all.
    pub limit: isize,
    /// Wall-clock budget in seconds; zero means none.
    pub time_cutoff: f64,
    /// Results weighing more than this are discarded.
    pub weight_cutoff: Weight,
    /// Recursion budget; exhausting it abandons the current path only.
    pub max_recursion: u32,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            limit: -1,
            time_cutoff: 0.0,
            weight_cutoff: INFINITE_WEIGHT,
            max_recursion: MAX_RECURSION_DEPTH,
        }
    }
}

/// One analysis: the printable output string and the path weight.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub weight: Weight,
    pub output: String,
}

/// One analysis as the symbol-pair tape it was read off.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupPath {
    pub weight: Weight,
    pub pairs: Vec<(String, String)>,
}

/// A cell of the two-row output tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SymbolPair {
    input: SymbolNumber,
    output: SymbolNumber,
}

/// All per-query state of one lookup. The transducer itself is never
/// mutated.
pub struct LookupContext<'t> {
    t: &'t Transducer,
    input: Vec<SymbolNumber>,
    /// Strings for transient symbols handed out to out-of-alphabet input;
    /// symbol number = alphabet size + position.
    transient_symbols: Vec<String>,
    tape: Vec<SymbolPair>,
    flag_state: FdState,
    /// Epsilon-visit set over the current path: (target, flag values).
    visited: HashSet<(TableIndex, Vec<i16>)>,
    paths: Vec<(Weight, Vec<SymbolPair>)>,
    seen: HashSet<(u32, Vec<(SymbolNumber, SymbolNumber)>)>,
    current_weight: Weight,
    max_results: Option<usize>,
    deadline: Option<Instant>,
    weight_cutoff: Weight,
    recursion_depth_left: u32,
    call_counter: u32,
    limit_reached: bool,
}

impl<'t> LookupContext<'t> {
    pub fn new(t: &'t Transducer, input: &str, config: &LookupConfig) -> Self {
        let (input, transient_symbols) = tokenize(t, input);
        Self {
            t,
            input,
            transient_symbols,
            tape: Vec::new(),
            flag_state: t.alphabet().fd_table().start_state(),
            visited: HashSet::new(),
            paths: Vec::new(),
            seen: HashSet::new(),
            current_weight: 0.0,
            max_results: (config.limit > 0).then_some(config.limit as usize),
            deadline: (config.time_cutoff > 0.0)
                .then(|| Instant::now() + Duration::from_secs_f64(config.time_cutoff)),
            weight_cutoff: config.weight_cutoff,
            recursion_depth_left: config.max_recursion,
            call_counter: 0,
            limit_reached: false,
        }
    }

    pub fn run_lookup(mut self) -> Vec<LookupResult> {
        self.get_analyses(0, 0, 0);
        // Distinct paths can print identically once meta symbols are
        // elided; the result is a set over (weight, output string).
        let mut printed: HashSet<(u32, String)> = HashSet::new();
        let mut results = Vec::with_capacity(self.paths.len());
        for (weight, tape) in &self.paths {
            let mut output = String::new();
            for pair in tape {
                output.push_str(self.print_symbol(pair.output));
            }
            if printed.insert((weight.to_bits(), output.clone())) {
                results.push(LookupResult {
                    weight: *weight,
                    output,
                });
            }
        }
        results
    }

    pub fn run_lookup_pairs(mut self) -> Vec<LookupPath> {
        self.get_analyses(0, 0, 0);
        let mut results = Vec::with_capacity(self.paths.len());
        for (weight, tape) in &self.paths {
            let pairs = tape
                .iter()
                .map(|pair| {
                    (
                        self.symbol_string(pair.input).to_string(),
                        self.symbol_string(pair.output).to_string(),
                    )
                })
                .collect();
            results.push(LookupPath {
                weight: *weight,
                pairs,
            });
        }
        results
    }

    fn symbol_string(&self, symbol: SymbolNumber) -> &str {
        let alphabet_size = self.t.alphabet().symbol_count();
        if symbol >= alphabet_size {
            &self.transient_symbols[(symbol - alphabet_size) as usize]
        } else {
            self.t.alphabet().string_from_symbol(symbol)
        }
    }

    fn print_symbol(&self, symbol: SymbolNumber) -> &str {
        let alphabet_size = self.t.alphabet().symbol_count();
        if symbol >= alphabet_size {
            &self.transient_symbols[(symbol - alphabet_size) as usize]
        } else {
            self.t.alphabet().print_symbol(symbol)
        }
    }

    fn out_of_time(&mut self) -> bool {
        self.call_counter += 1;
        if self.call_counter & (CLOCK_CHECK_INTERVAL - 1) == 0
            && let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            self.limit_reached = true;
        }
        self.limit_reached
    }

    fn tape_write(&mut self, pos: usize, input: SymbolNumber, output: SymbolNumber) {
        let pair = SymbolPair { input, output };
        if pos < self.tape.len() {
            self.tape[pos] = pair;
        } else {
            self.tape.push(pair);
        }
    }

    /// Identity and default on the output side stand for "whatever the
    /// input was"; everything else is emitted as stored.
    fn emit_symbol(&self, output: SymbolNumber, consumed: SymbolNumber) -> SymbolNumber {
        let alphabet = self.t.alphabet();
        if Some(output) == alphabet.identity_symbol() || Some(output) == alphabet.default_symbol() {
            consumed
        } else {
            output
        }
    }

    fn note_analysis(&mut self, tape_pos: usize, final_weight: Weight) {
        let total = self.current_weight + final_weight;
        if total > self.weight_cutoff {
            return;
        }
        let tape = self.tape[..tape_pos].to_vec();
        let key = (
            total.to_bits(),
            tape.iter().map(|p| (p.input, p.output)).collect(),
        );
        if !self.seen.insert(key) {
            return;
        }
        self.paths.push((total, tape));
        if let Some(max) = self.max_results
            && self.paths.len() >= max
        {
            self.limit_reached = true;
        }
    }

    fn get_analyses(&mut self, input_pos: usize, tape_pos: usize, i: TableIndex) {
        if self.limit_reached || self.out_of_time() {
            return;
        }
        if self.recursion_depth_left == 0 {
            return;
        }
        self.recursion_depth_left -= 1;

        if indexes_transition_table(i) {
            self.try_epsilon_transitions(input_pos, tape_pos, i + 1);
            if input_pos == self.input.len() {
                if self.t.is_final(i) {
                    self.note_analysis(tape_pos, self.t.final_weight(i));
                }
            } else {
                self.consume_input(input_pos, tape_pos, i);
            }
        } else {
            self.try_epsilon_index(input_pos, tape_pos, i as usize + 1);
            if input_pos == self.input.len() {
                if self.t.is_final(i) {
                    self.note_analysis(tape_pos, self.t.final_weight(i));
                }
            } else {
                self.consume_input(input_pos, tape_pos, i);
            }
        }

        self.recursion_depth_left += 1;
    }

    fn try_epsilon_index(&mut self, input_pos: usize, tape_pos: usize, pos: usize) {
        if let Some(cell) = self.t.tables().index_table().get(pos)
            && cell.input == 0
        {
            self.try_epsilon_transitions(input_pos, tape_pos, cell.target);
        }
    }

    fn try_epsilon_transitions(&mut self, input_pos: usize, tape_pos: usize, mut cursor: TableIndex) {
        loop {
            if self.limit_reached {
                return;
            }
            let tr = *self.t.tables().transition(cursor);
            if tr.input == 0 {
                let key = (tr.target, self.flag_state.values().to_vec());
                if self.visited.insert(key.clone()) {
                    self.tape_write(tape_pos, 0, tr.output);
                    self.current_weight += tr.weight;
                    self.get_analyses(input_pos, tape_pos + 1, tr.target);
                    self.current_weight -= tr.weight;
                    self.visited.remove(&key);
                }
                cursor += 1;
            } else if let Some(op) = self.t.alphabet().fd_table().get_operation(tr.input).copied() {
                let old_value = self.flag_state.get(op.feature);
                if self.flag_state.apply(&op) {
                    let key = (tr.target, self.flag_state.values().to_vec());
                    if self.visited.insert(key.clone()) {
                        self.tape_write(tape_pos, tr.input, tr.output);
                        self.current_weight += tr.weight;
                        self.get_analyses(input_pos, tape_pos + 1, tr.target);
                        self.current_weight -= tr.weight;
                        self.visited.remove(&key);
                    }
                }
                self.flag_state.set(op.feature, old_value);
                cursor += 1;
            } else {
                return;
            }
        }
    }

    fn consume_input(&mut self, input_pos: usize, tape_pos: usize, state: TableIndex) {
        let symbol = self.input[input_pos];
        let alphabet = self.t.alphabet();
        let in_alphabet = symbol < alphabet.symbol_count();
        let identity = alphabet.identity_symbol();
        let unknown = alphabet.unknown_symbol();
        let default = alphabet.default_symbol();

        let mut found = false;
        if in_alphabet {
            found |= self.find_group(state, symbol, symbol, input_pos, tape_pos);
        } else {
            if let Some(identity) = identity {
                found |= self.find_group(state, identity, symbol, input_pos, tape_pos);
            }
            if let Some(unknown) = unknown {
                found |= self.find_group(state, unknown, symbol, input_pos, tape_pos);
            }
        }
        if !found
            && let Some(default) = default
        {
            self.find_group(state, default, symbol, input_pos, tape_pos);
        }
    }

    /// Walk the contiguous transition group for `match_symbol` out of
    /// `state`, consuming `consumed` from the input tape.
    fn find_group(
        &mut self,
        state: TableIndex,
        match_symbol: SymbolNumber,
        consumed: SymbolNumber,
        input_pos: usize,
        tape_pos: usize,
    ) -> bool {
        let Some(mut cursor) = self.t.next(state, match_symbol) else {
            return false;
        };
        let mut found = false;
        while let Some(tr) = self.t.take_non_epsilons(cursor, match_symbol) {
            if self.limit_reached {
                return found;
            }
            found = true;
            let output = self.emit_symbol(tr.symbol, consumed);
            self.tape_write(tape_pos, consumed, output);
            self.current_weight += tr.weight;
            self.get_analyses(input_pos + 1, tape_pos + 1, tr.index);
            self.current_weight -= tr.weight;
            cursor += 1;
        }
        found
    }

    // ------------------------------------------------------------------
    // Infinite-ambiguity probe: does an epsilon cycle close while reading
    // the input?
    // ------------------------------------------------------------------

    pub fn find_loop(mut self) -> bool {
        let mut visited = HashSet::new();
        self.loop_search(0, 0, &mut visited)
    }

    fn loop_search(
        &mut self,
        input_pos: usize,
        i: TableIndex,
        visited: &mut HashSet<(usize, TableIndex, Vec<i16>)>,
    ) -> bool {
        if self.recursion_depth_left == 0 {
            return false;
        }
        self.recursion_depth_left -= 1;
        let found = self.loop_search_inner(input_pos, i, visited);
        self.recursion_depth_left += 1;
        found
    }

    fn loop_search_inner(
        &mut self,
        input_pos: usize,
        i: TableIndex,
        visited: &mut HashSet<(usize, TableIndex, Vec<i16>)>,
    ) -> bool {
        // Epsilon-and-flag closure, watching for a revisit at the same
        // input position.
        let eps_cursor = if indexes_transition_table(i) {
            Some(i + 1)
        } else {
            self.t
                .tables()
                .index_table()
                .get(i as usize + 1)
                .filter(|cell| cell.input == 0)
                .map(|cell| cell.target)
        };
        if let Some(mut cursor) = eps_cursor {
            loop {
                let tr = *self.t.tables().transition(cursor);
                let flag_op = self.t.alphabet().fd_table().get_operation(tr.input).copied();
                if tr.input != 0 && flag_op.is_none() {
                    break;
                }
                let mut old_value = None;
                let allowed = if let Some(op) = flag_op {
                    old_value = Some((op.feature, self.flag_state.get(op.feature)));
                    self.flag_state.apply(&op)
                } else {
                    true
                };
                if allowed {
                    let key = (input_pos, tr.target, self.flag_state.values().to_vec());
                    if !visited.insert(key.clone()) {
                        return true;
                    }
                    let found = self.loop_search(input_pos, tr.target, visited);
                    visited.remove(&key);
                    if found {
                        return true;
                    }
                }
                if let Some((feature, value)) = old_value {
                    self.flag_state.set(feature, value);
                }
                cursor += 1;
            }
        }

        if input_pos < self.input.len() {
            let symbol = self.input[input_pos];
            if let Some(mut cursor) = self.t.next(i, symbol) {
                while let Some(tr) = self.t.take_non_epsilons(cursor, symbol) {
                    if self.loop_search(input_pos + 1, tr.index, visited) {
                        return true;
                    }
                    cursor += 1;
                }
            }
        }
        false
    }
}

/// Tokenize `input` against the transducer's encoder. Out-of-alphabet
/// codepoints get transient symbol numbers above the alphabet so the lookup
/// can route them through identity/unknown transitions.
fn tokenize(t: &Transducer, input: &str) -> (Vec<SymbolNumber>, Vec<String>) {
    let mut symbols = Vec::new();
    let mut transients: Vec<String> = Vec::new();
    let mut transient_numbers: HashMap<String, SymbolNumber> = HashMap::new();
    let base = t.alphabet().symbol_count();

    let mut cursor = input.as_bytes();
    let mut offset = 0;
    while offset < input.len() {
        if let Some(symbol) = t.encoder().find_key(&mut cursor) {
            offset = input.len() - cursor.len();
            symbols.push(symbol);
            continue;
        }
        // The encoder never stops mid-codepoint, so this boundary is safe.
        let ch = match input[offset..].chars().next() {
            Some(ch) => ch,
            None => break,
        };
        let text = ch.to_string();
        let number = *transient_numbers.entry(text.clone()).or_insert_with(|| {
            let number = base as usize + transients.len();
            transients.push(text);
            number.min(NO_SYMBOL as usize - 1) as SymbolNumber
        });
        symbols.push(number);
        offset += ch.len_utf8();
        cursor = &input.as_bytes()[offset..];
    }
    (symbols, transients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::{EPSILON_STRING, IDENTITY_STRING, TransducerAlphabet};
    use crate::header::TransducerHeader;
    use crate::tables::{Transition, TransitionIndex, TransducerTables};
    use crate::TRANSITION_TARGET_TABLE_START as TT;

    fn header(weighted: bool, symbols: &[&str], input_count: u16, indices: u32, transitions: u32) -> TransducerHeader {
        TransducerHeader {
            input_symbol_count: input_count,
            symbol_count: symbols.len() as u16,
            index_table_size: indices,
            transition_table_size: transitions,
            state_count: 0,
            transition_count: 0,
            weighted,
            deterministic: false,
            input_deterministic: false,
            minimized: false,
            cyclic: false,
            has_epsilon_epsilon_transitions: false,
            has_input_epsilon_transitions: false,
            has_input_epsilon_cycles: false,
            has_unweighted_input_epsilon_cycles: false,
        }
    }

    fn build(
        weighted: bool,
        symbols: &[&str],
        input_count: u16,
        indices: Vec<TransitionIndex>,
        transitions: Vec<Transition>,
    ) -> Transducer {
        let alphabet =
            TransducerAlphabet::from_symbols(symbols.iter().map(|s| s.to_string()).collect())
                .unwrap();
        let h = header(
            weighted,
            symbols,
            input_count,
            indices.len() as u32,
            transitions.len() as u32,
        );
        let tables = TransducerTables::new(indices, transitions, weighted);
        Transducer::from_parts(h, alphabet, tables).unwrap()
    }

    fn tr(input: u16, output: u16, target: u32, weight: f32) -> Transition {
        Transition {
            input,
            output,
            target,
            weight,
        }
    }

    /// `a:A b:B` in a chain, final after "ab".
    fn simple_map() -> Transducer {
        build(
            false,
            &[EPSILON_STRING, "a", "b", "A", "B"],
            3,
            vec![
                TransitionIndex::EMPTY, // state 0 is not final
                TransitionIndex::EMPTY, // no epsilons
                TransitionIndex {
                    input: 1,
                    target: TT + 4,
                },
                TransitionIndex::EMPTY, // no 'b' from the start
            ],
            vec![
                Transition::boundary(false, 0.0), // s1
                tr(2, 4, TT + 2, 0.0),            // s1 --b:B--> s2
                Transition::boundary(true, 0.0),  // s2, final
                Transition::boundary(false, 0.0), // terminator
                tr(1, 3, TT, 0.0),                // s0 --a:A--> s1
                Transition::boundary(false, 0.0), // terminator
            ],
        )
    }

    #[test]
    fn trivial_unweighted_map() {
        let t = simple_map();
        let results = t.lookup("ab", -1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "AB");
        assert_eq!(results[0].weight, 0.0);

        assert!(t.lookup("ac", -1, 0.0).is_empty());
        assert!(t.lookup("a", -1, 0.0).is_empty());
        assert!(t.lookup("abb", -1, 0.0).is_empty());
    }

    #[test]
    fn lookup_pairs_keeps_the_tape() {
        let t = simple_map();
        let paths = t.lookup_pairs("ab", -1, 0.0);
        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths[0].pairs,
            vec![
                ("a".to_string(), "A".to_string()),
                ("b".to_string(), "B".to_string()),
            ]
        );
    }

    /// Two weighted paths for "a": x/1.0 before y/2.5 in table order.
    fn weighted_fork() -> Transducer {
        build(
            true,
            &[EPSILON_STRING, "a", "x", "y"],
            2,
            vec![
                TransitionIndex::EMPTY,
                TransitionIndex::EMPTY,
                TransitionIndex {
                    input: 1,
                    target: TT + 2,
                },
            ],
            vec![
                Transition::boundary(true, 0.0),  // s1, final
                Transition::boundary(false, 0.0), // terminator
                tr(1, 2, TT, 1.0),                // a:x / 1.0
                tr(1, 3, TT, 2.5),                // a:y / 2.5
                Transition::boundary(false, 0.0), // terminator
            ],
        )
    }

    #[test]
    fn weighted_ranking_in_dfs_order() {
        let t = weighted_fork();
        let results = t.lookup("a", 2, 0.0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].output, "x");
        assert_eq!(results[0].weight, 1.0);
        assert_eq!(results[1].output, "y");
        assert_eq!(results[1].weight, 2.5);
    }

    #[test]
    fn result_limit_truncates() {
        let t = weighted_fork();
        let results = t.lookup("a", 1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "x");
    }

    #[test]
    fn weight_cutoff_prunes_heavy_results() {
        let t = weighted_fork();
        let results = t.lookup_with(
            "a",
            &LookupConfig {
                weight_cutoff: 2.0,
                ..LookupConfig::default()
            },
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "x");
    }

    /// One state, an epsilon self-loop, final.
    fn epsilon_loop() -> Transducer {
        build(
            false,
            &[EPSILON_STRING],
            1,
            vec![
                TransitionIndex::final_cell(0.0, false),
                TransitionIndex {
                    input: 0,
                    target: TT + 1,
                },
            ],
            vec![
                Transition::boundary(false, 0.0),
                tr(0, 0, 0, 0.0), // back to state 0, the index base
                Transition::boundary(false, 0.0),
            ],
        )
    }

    #[test]
    fn epsilon_cycle_is_cut() {
        let t = epsilon_loop();
        let results = t.lookup("", -1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "");
        assert_eq!(results[0].weight, 0.0);
    }

    #[test]
    fn epsilon_cycle_is_reported_as_infinitely_ambiguous() {
        assert!(epsilon_loop().is_lookup_infinitely_ambiguous(""));
        assert!(!simple_map().is_lookup_infinitely_ambiguous("ab"));
    }

    /// Identity self-loop: accepts anything, echoing it back.
    fn identity_loop() -> Transducer {
        build(
            false,
            &[EPSILON_STRING, IDENTITY_STRING],
            2,
            vec![
                TransitionIndex::final_cell(0.0, false),
                TransitionIndex::EMPTY,
                TransitionIndex {
                    input: 1,
                    target: TT + 1,
                },
            ],
            vec![
                Transition::boundary(false, 0.0),
                tr(1, 1, 0, 0.0), // identity:identity back to state 0
                Transition::boundary(false, 0.0),
            ],
        )
    }

    #[test]
    fn identity_echoes_out_of_alphabet_input() {
        let t = identity_loop();
        let results = t.lookup("zzz", -1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "zzz");

        let results = t.lookup("äx", -1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "äx");
    }

    #[test]
    fn no_identity_no_results_for_unknown_input() {
        let t = simple_map();
        assert!(t.lookup("zz", -1, 0.0).is_empty());
    }

    /// `@P.F.A@ a:a @R.F.x@` where the require flag is parameterized.
    fn flag_chain(require: &str) -> Transducer {
        build(
            false,
            &[EPSILON_STRING, "@P.F.A@", require, "a"],
            4,
            vec![
                TransitionIndex::EMPTY,
                TransitionIndex {
                    input: 0,
                    target: TT + 6,
                },
            ],
            vec![
                Transition::boundary(false, 0.0), // s1
                tr(3, 3, TT + 3, 0.0),            // s1 --a:a--> s2
                Transition::boundary(false, 0.0), // terminator
                Transition::boundary(false, 0.0), // s2
                tr(2, 2, TT + 7, 0.0),            // s2 --require--> s3
                Transition::boundary(false, 0.0), // terminator
                tr(1, 1, TT, 0.0),                // s0 --@P.F.A@--> s1
                Transition::boundary(true, 0.0),  // s3, final
                Transition::boundary(false, 0.0), // terminator
            ],
        )
    }

    #[test]
    fn flag_gating_accepts_matching_require() {
        let t = flag_chain("@R.F.A@");
        let results = t.lookup("a", -1, 0.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output, "a");
    }

    #[test]
    fn flag_gating_rejects_mismatched_require() {
        let t = flag_chain("@R.F.B@");
        assert!(t.lookup("a", -1, 0.0).is_empty());
    }

    #[test]
    fn flags_do_not_leak_into_output() {
        let t = flag_chain("@R.F.A@");
        let paths = t.lookup_pairs("a", -1, 0.0);
        assert_eq!(paths.len(), 1);
        // The tape keeps the flag pair, the printed output elides it.
        assert_eq!(paths[0].pairs.len(), 3);
        assert_eq!(paths[0].pairs[1], ("a".to_string(), "a".to_string()));
    }

    #[test]
    fn recursion_cap_abandons_deep_paths_only() {
        let t = simple_map();
        let results = t.lookup_with(
            "ab",
            &LookupConfig {
                max_recursion: 1,
                ..LookupConfig::default()
            },
        );
        assert!(results.is_empty());
    }
}
