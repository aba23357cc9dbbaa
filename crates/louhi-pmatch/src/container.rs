// The pattern container and the match interpreter.
//
// The container owns the network (toplevel plus named subtransducers) and
// the cross-call tallies; everything a single scan mutates lives in a
// MatchRun so the tables stay immutable and shareable.

use crate::PmatchError;
use crate::alphabet::{PmatchAlphabet, SpecialSymbol};
use crate::location::Location;
use crate::transducer::PmatchTransducer;
use hashbrown::{HashMap, HashSet};
use louhi_fst::encoder::Encoder;
use louhi_fst::flags::FdState;
use louhi_fst::header::TransducerHeader;
use louhi_fst::tables::Transition;
use louhi_fst::transducer::Transducer;
use louhi_fst::{
    CLOCK_CHECK_INTERVAL, MAX_RECURSION_DEPTH, NO_SYMBOL, SymbolNumber, TableIndex, Weight,
    indexes_transition_table,
};
use std::time::{Duration, Instant};

/// Bound on how far a context check may wander from its entry point.
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 254;

/// Name under which the toplevel is stored in a container archive.
pub const TOPLEVEL_NAME: &str = "TOP";

const ARCHIVE_MAGIC: &[u8; 4] = b"LPM1";

/// A container of mutually recursive transducers keyed by name, with one
/// toplevel pattern driving the scan.
pub struct PmatchContainer {
    alphabet: PmatchAlphabet,
    encoder: Encoder,
    toplevel: PmatchTransducer,
    rtns: HashMap<SymbolNumber, PmatchTransducer>,
    weighted: bool,

    verbose: bool,
    locate_mode: bool,
    count_patterns: bool,
    delete_patterns: bool,
    extract_patterns: bool,
    mark_patterns: bool,
    profile_mode: bool,
    single_codepoint_tokenization: bool,
    max_context_length: usize,
    max_recursion: u32,

    counters: HashMap<String, u64>,
    pattern_counts: HashMap<String, u64>,
    possible_first_symbols: Vec<bool>,
}

impl PmatchContainer {
    /// Assemble a container from a toplevel and its named subtransducers.
    /// Every member must share the toplevel's symbol numbering.
    pub fn from_transducers(
        toplevel: Transducer,
        rtns: Vec<(String, Transducer)>,
    ) -> Result<Self, PmatchError> {
        let mut alphabet = PmatchAlphabet::new(toplevel.alphabet())?;
        for (name, t) in &rtns {
            check_member_alphabet(&mut alphabet, name, t)?;
        }
        let weighted = toplevel.is_weighted();
        let toplevel = PmatchTransducer::from_transducer(&toplevel, TOPLEVEL_NAME);
        let mut registry = HashMap::new();
        for (name, t) in &rtns {
            let symbol = match alphabet.rtn_symbol(name) {
                Some(symbol) => symbol,
                None => alphabet.add_symbol(&format!("@I.{name}@"))?,
            };
            registry.insert(symbol, PmatchTransducer::from_transducer(t, name));
        }
        for (name, symbol) in alphabet
            .rtn_names()
            .map(|(n, s)| (n.to_string(), s))
            .collect::<Vec<_>>()
        {
            if !registry.contains_key(&symbol) {
                return Err(PmatchError::UnsatisfiedRtn { name });
            }
        }

        let encoder = Encoder::new(alphabet.base(), alphabet.base().symbol_count());
        let mut container = Self {
            alphabet,
            encoder,
            toplevel,
            rtns: registry,
            weighted,
            verbose: false,
            locate_mode: false,
            count_patterns: false,
            delete_patterns: false,
            extract_patterns: false,
            mark_patterns: false,
            profile_mode: false,
            single_codepoint_tokenization: false,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            max_recursion: MAX_RECURSION_DEPTH,
            counters: HashMap::new(),
            pattern_counts: HashMap::new(),
            possible_first_symbols: Vec::new(),
        };
        container.possible_first_symbols = container.collect_first_symbols();
        Ok(container)
    }

    /// Load a container archive: magic, member count, then per member a
    /// NUL-terminated name and a length-prefixed transducer image. The
    /// first member must be the toplevel.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PmatchError> {
        if data.len() < 8 || &data[..4] != ARCHIVE_MAGIC {
            return Err(PmatchError::BadArchive("missing magic".to_string()));
        }
        let count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let mut pos = 8;
        let mut toplevel = None;
        let mut rtns = Vec::new();
        for _ in 0..count {
            let name_start = pos;
            while pos < data.len() && data[pos] != 0 {
                pos += 1;
            }
            if pos >= data.len() {
                return Err(PmatchError::BadArchive("unterminated member name".to_string()));
            }
            let name = String::from_utf8_lossy(&data[name_start..pos]).into_owned();
            pos += 1;
            if pos + 4 > data.len() {
                return Err(PmatchError::BadArchive("missing member length".to_string()));
            }
            let len =
                u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                    as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(PmatchError::BadArchive(format!(
                    "member {name:?} is truncated"
                )));
            }
            let t = Transducer::from_bytes(&data[pos..pos + len])?;
            pos += len;
            if toplevel.is_none() {
                if name != TOPLEVEL_NAME {
                    return Err(PmatchError::BadArchive(format!(
                        "first member is {name:?}, expected {TOPLEVEL_NAME:?}"
                    )));
                }
                toplevel = Some(t);
            } else {
                rtns.push((name, t));
            }
        }
        let Some(toplevel) = toplevel else {
            return Err(PmatchError::BadArchive("empty archive".to_string()));
        };
        Self::from_transducers(toplevel, rtns)
    }

    /// Append the container archive to `out`.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), PmatchError> {
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.extend_from_slice(&(1 + self.rtns.len() as u32).to_le_bytes());
        self.write_member(out, &self.toplevel)?;
        let mut members: Vec<&PmatchTransducer> = self.rtns.values().collect();
        members.sort_by(|a, b| a.name().cmp(b.name()));
        for member in members {
            self.write_member(out, member)?;
        }
        Ok(())
    }

    fn write_member(&self, out: &mut Vec<u8>, member: &PmatchTransducer) -> Result<(), PmatchError> {
        let tables = member.tables().clone();
        let header = TransducerHeader {
            input_symbol_count: self.alphabet.base().symbol_count(),
            symbol_count: self.alphabet.base().symbol_count(),
            index_table_size: tables.index_table().len() as TableIndex,
            transition_table_size: tables.transition_table().len() as TableIndex,
            state_count: 0,
            transition_count: 0,
            weighted: self.weighted,
            deterministic: false,
            input_deterministic: false,
            minimized: false,
            cyclic: false,
            has_epsilon_epsilon_transitions: false,
            has_input_epsilon_transitions: false,
            has_input_epsilon_cycles: false,
            has_unweighted_input_epsilon_cycles: false,
        };
        let t = Transducer::from_parts(header, self.alphabet.base().clone(), tables)?;
        out.extend_from_slice(member.name().as_bytes());
        out.push(0);
        let mut image = Vec::new();
        t.write(&mut image);
        out.extend_from_slice(&(image.len() as u32).to_le_bytes());
        out.extend_from_slice(&image);
        Ok(())
    }

    pub fn alphabet(&self) -> &PmatchAlphabet {
        &self.alphabet
    }

    pub fn set_verbose(&mut self, on: bool) {
        self.verbose = on;
    }

    pub fn set_locate_mode(&mut self, on: bool) {
        self.locate_mode = on;
    }

    pub fn set_count_patterns(&mut self, on: bool) {
        self.count_patterns = on;
    }

    pub fn set_delete_patterns(&mut self, on: bool) {
        self.delete_patterns = on;
    }

    pub fn set_extract_patterns(&mut self, on: bool) {
        self.extract_patterns = on;
    }

    pub fn set_mark_patterns(&mut self, on: bool) {
        self.mark_patterns = on;
    }

    pub fn set_profile(&mut self, on: bool) {
        self.profile_mode = on;
    }

    pub fn set_single_codepoint_tokenization(&mut self, on: bool) {
        self.single_codepoint_tokenization = on;
    }

    pub fn set_max_context(&mut self, max: usize) {
        self.max_context_length = max;
    }

    pub fn set_max_recursion(&mut self, max: u32) {
        self.max_recursion = max;
    }

    pub fn counters(&self) -> &HashMap<String, u64> {
        &self.counters
    }

    pub fn pattern_counts(&self) -> &HashMap<String, u64> {
        &self.pattern_counts
    }

    pub fn get_pattern_count_info(&self) -> String {
        let mut entries: Vec<(&String, &u64)> = self.pattern_counts.iter().collect();
        entries.sort();
        entries
            .iter()
            .map(|(name, count)| format!("{name}\t{count}\n"))
            .collect()
    }

    /// Scan `input`, rewriting it according to the current mode toggles.
    pub fn match_text(&mut self, input: &str, time_cutoff: f64, weight_cutoff: Weight) -> String {
        self.locate_mode = false;
        let (output, counters, pattern_counts) = {
            let mut run = MatchRun::new(self, input, time_cutoff, weight_cutoff);
            let output = run.run_match();
            let (counters, pattern_counts) = run.into_tallies();
            (output, counters, pattern_counts)
        };
        self.counters = counters;
        self.pattern_counts = pattern_counts;
        output
    }

    /// Scan `input`, returning one vector of weight-ordered locations per
    /// scanned position.
    pub fn locate(
        &mut self,
        input: &str,
        time_cutoff: f64,
        weight_cutoff: Weight,
    ) -> Vec<Vec<Location>> {
        self.locate_mode = true;
        let (locations, counters, pattern_counts) = {
            let mut run = MatchRun::new(self, input, time_cutoff, weight_cutoff);
            let locations = run.run_locate();
            let (counters, pattern_counts) = run.into_tallies();
            (locations, counters, pattern_counts)
        };
        self.counters = counters;
        self.pattern_counts = pattern_counts;
        locations
    }

    fn not_possible_first_symbol(&self, symbol: SymbolNumber) -> bool {
        if self.possible_first_symbols.is_empty() {
            return false;
        }
        (symbol as usize) >= self.possible_first_symbols.len()
            || !self.possible_first_symbols[symbol as usize]
    }

    /// Conservative prefilter over the symbols a match can start with.
    /// Anything the walk cannot account for statically (contexts, network
    /// calls, fallback symbols) disables the filter entirely.
    fn collect_first_symbols(&self) -> Vec<bool> {
        let alphabet = &self.alphabet;
        let base = alphabet.base();
        let mut possible = vec![false; base.symbol_count() as usize];
        let mut visited: HashSet<(usize, TableIndex)> = HashSet::new();
        let mut stack: Vec<(&PmatchTransducer, TableIndex)> = vec![(&self.toplevel, 0)];

        while let Some((t, state)) = stack.pop() {
            if !visited.insert((t as *const PmatchTransducer as usize, state)) {
                continue;
            }
            if t.is_final(state) {
                // The pattern can match the empty string anywhere.
                return Vec::new();
            }
            for (symbol, cursor) in state_groups(alphabet, t, state) {
                let uncertain = alphabet.special(symbol).is_some_and(|s| {
                    !matches!(
                        s,
                        SpecialSymbol::Entry | SpecialSymbol::Exit | SpecialSymbol::InputMark
                    )
                }) || alphabet.rtn_name(symbol).is_some()
                    || alphabet.captured_name(symbol).is_some()
                    || Some(symbol) == base.identity_symbol()
                    || Some(symbol) == base.unknown_symbol()
                    || Some(symbol) == base.default_symbol();
                if uncertain {
                    return Vec::new();
                }

                let transparent = symbol == 0
                    || base.is_flag_diacritic(symbol)
                    || alphabet.special(symbol).is_some()
                    || alphabet.capture_name(symbol).is_some()
                    || alphabet.counter_name(symbol).is_some()
                    || alphabet.guard_name(symbol).is_some()
                    || alphabet.end_tag(symbol).is_some();
                if let Some(list) = alphabet.list(symbol) {
                    if list.exclusionary {
                        return Vec::new();
                    }
                    for member in 0..base.symbol_count() {
                        if list.admits(member) {
                            possible[member as usize] = true;
                        }
                    }
                    continue;
                }
                if transparent {
                    // The epsilon group also holds the flag transitions.
                    let mut c = cursor;
                    loop {
                        let input = t.transition(c).input;
                        if input != symbol && !(symbol == 0 && base.is_flag_diacritic(input)) {
                            break;
                        }
                        stack.push((t, t.transition(c).target));
                        c += 1;
                    }
                } else {
                    possible[symbol as usize] = true;
                }
            }
        }
        possible
    }
}

fn check_member_alphabet(
    alphabet: &mut PmatchAlphabet,
    name: &str,
    t: &Transducer,
) -> Result<(), PmatchError> {
    for (i, symbol) in t.alphabet().symbol_table().iter().enumerate() {
        if i < alphabet.base().symbol_count() as usize {
            if alphabet.base().symbol_table()[i] != *symbol {
                return Err(PmatchError::AlphabetMismatch {
                    name: name.to_string(),
                });
            }
        } else {
            alphabet.add_symbol(symbol)?;
        }
    }
    Ok(())
}

/// Transition groups leaving the state at `i`: `(input symbol, cursor)`.
fn state_groups(
    alphabet: &PmatchAlphabet,
    t: &PmatchTransducer,
    i: TableIndex,
) -> Vec<(SymbolNumber, TableIndex)> {
    let mut groups = Vec::new();
    if indexes_transition_table(i) {
        let mut cursor = i + 1;
        let mut current = NO_SYMBOL;
        loop {
            let tr = t.transition(cursor);
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
        for symbol in 0..alphabet.base().symbol_count() {
            let pos = i as usize + 1 + symbol as usize;
            if let Some(cell) = t.tables().index_table().get(pos)
                && cell.matches(symbol)
            {
                groups.push((symbol, cell.target));
            }
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// The interpreter
// ---------------------------------------------------------------------------

/// Raised when a negative context reaches its exit: the context matched, so
/// the path that entered it must be abandoned.
struct ContextTrap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextCheck {
    None,
    Lc,
    Nlc,
    Rc,
    Nrc,
}

/// Per-entry interpreter state. Several instances of the same transducer
/// may be live in the network stack at once, so this is stacked rather
/// than stored with the tables.
#[derive(Debug, Clone)]
struct LocalVariables {
    flag_state: FdState,
    tape_step: i8,
    context: ContextCheck,
    context_placeholder: usize,
    max_context_length_remaining: usize,
    pending_passthrough: bool,
}

struct RtnFrame<'c> {
    caller: &'c PmatchTransducer,
    caller_index: TableIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SymbolPair {
    input: SymbolNumber,
    output: SymbolNumber,
}

#[derive(Debug, Clone)]
struct Capture {
    name: String,
    begin: usize,
    end: usize,
}

#[derive(Debug, Clone)]
struct OpenCapture {
    name: String,
    begin: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    tape: Vec<SymbolPair>,
    input_length: usize,
    weight: Weight,
}

struct MatchRun<'c> {
    alphabet: &'c PmatchAlphabet,
    toplevel: &'c PmatchTransducer,
    rtns: &'c HashMap<SymbolNumber, PmatchTransducer>,

    verbose: bool,
    locate_mode: bool,
    count_patterns: bool,
    delete_patterns: bool,
    extract_patterns: bool,
    mark_patterns: bool,
    profile_mode: bool,
    max_context_length: usize,
    max_recursion: u32,

    input: Vec<SymbolNumber>,
    transient_symbols: Vec<String>,
    /// Codepoint offset of each input symbol, plus the total at the end.
    char_offsets: Vec<usize>,
    not_possible_first: Vec<bool>,

    scan_pos: usize,
    tape: Vec<SymbolPair>,
    entry_stack: Vec<usize>,
    rtn_stack: Vec<RtnFrame<'c>>,
    local_stack: Vec<LocalVariables>,
    captures: Vec<Capture>,
    open_captures: Vec<OpenCapture>,
    global_flag_state: FdState,

    counters: HashMap<String, u64>,
    pattern_counts: HashMap<String, u64>,

    recursion_depth_left: u32,
    call_counter: u32,
    deadline: Option<Instant>,
    limit_reached: bool,
    weight_cutoff: Weight,
    weight_limit: Weight,
    running_weight: Weight,

    best: Option<Candidate>,
    candidates: Vec<Candidate>,
}

impl<'c> MatchRun<'c> {
    fn new(
        container: &'c PmatchContainer,
        input: &str,
        time_cutoff: f64,
        weight_cutoff: Weight,
    ) -> Self {
        let (symbols, transients) = tokenize(container, input);
        let mut char_offsets = Vec::with_capacity(symbols.len() + 1);
        let mut offset = 0;
        let base_count = container.alphabet.base().symbol_count();
        for &symbol in &symbols {
            char_offsets.push(offset);
            offset += if symbol >= base_count {
                transients[(symbol - base_count) as usize].chars().count()
            } else {
                container
                    .alphabet
                    .base()
                    .string_from_symbol(symbol)
                    .chars()
                    .count()
            };
        }
        char_offsets.push(offset);
        let not_possible_first = symbols
            .iter()
            .map(|&s| container.not_possible_first_symbol(s))
            .collect();

        Self {
            alphabet: &container.alphabet,
            toplevel: &container.toplevel,
            rtns: &container.rtns,
            verbose: container.verbose,
            locate_mode: container.locate_mode,
            count_patterns: container.count_patterns,
            delete_patterns: container.delete_patterns,
            extract_patterns: container.extract_patterns,
            mark_patterns: container.mark_patterns,
            profile_mode: container.profile_mode,
            max_context_length: container.max_context_length,
            max_recursion: container.max_recursion,
            input: symbols,
            transient_symbols: transients,
            char_offsets,
            not_possible_first,
            scan_pos: 0,
            tape: Vec::new(),
            entry_stack: Vec::new(),
            rtn_stack: Vec::new(),
            local_stack: Vec::new(),
            captures: Vec::new(),
            open_captures: Vec::new(),
            global_flag_state: container.alphabet.base().fd_table().start_state(),
            counters: container.counters.clone(),
            pattern_counts: container.pattern_counts.clone(),
            recursion_depth_left: container.max_recursion,
            call_counter: 0,
            deadline: (time_cutoff > 0.0)
                .then(|| Instant::now() + Duration::from_secs_f64(time_cutoff)),
            limit_reached: false,
            weight_cutoff,
            weight_limit: weight_cutoff,
            running_weight: 0.0,
            best: None,
            candidates: Vec::new(),
        }
    }

    fn into_tallies(self) -> (HashMap<String, u64>, HashMap<String, u64>) {
        (self.counters, self.pattern_counts)
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    fn run_match(&mut self) -> String {
        let mut output = String::new();
        let mut pos = 0;
        while pos < self.input.len() {
            if self.limit_reached {
                for rest in pos..self.input.len() {
                    self.pass_through(&mut output, rest);
                }
                break;
            }
            if self.not_possible_first[pos] {
                self.pass_through(&mut output, pos);
                pos += 1;
                continue;
            }
            self.match_position(pos);
            match self.best.take() {
                Some(best) => {
                    let consumed = best.input_length;
                    self.commit_match(&mut output, &best);
                    if consumed == 0 {
                        self.pass_through(&mut output, pos);
                    }
                    pos += consumed.max(1);
                }
                None => {
                    self.pass_through(&mut output, pos);
                    pos += 1;
                }
            }
        }
        output
    }

    fn run_locate(&mut self) -> Vec<Vec<Location>> {
        let mut locations = Vec::new();
        let mut pos = 0;
        while pos < self.input.len() {
            if self.limit_reached {
                break;
            }
            if self.not_possible_first[pos] {
                locations.push(Vec::new());
                pos += 1;
                continue;
            }
            self.match_position(pos);
            let mut found: Vec<Candidate> = std::mem::take(&mut self.candidates);
            found.sort_by(|a, b| a.weight.total_cmp(&b.weight));
            let advance = self
                .best
                .take()
                .map(|best| best.input_length.max(1))
                .unwrap_or(1);
            locations.push(
                found
                    .iter()
                    .map(|candidate| self.locatefy(pos, candidate))
                    .collect(),
            );
            pos += advance;
        }
        locations
    }

    fn match_position(&mut self, pos: usize) {
        self.scan_pos = pos;
        self.best = None;
        self.candidates.clear();
        self.weight_limit = self.weight_cutoff;
        self.running_weight = 0.0;
        self.tape.clear();
        self.entry_stack.clear();
        self.rtn_stack.clear();
        self.captures.clear();
        self.open_captures.clear();
        self.global_flag_state.reset();
        self.recursion_depth_left = self.max_recursion;
        self.local_stack.clear();
        self.local_stack.push(self.fresh_locals());
        let toplevel = self.toplevel;
        // A trap that reaches the toplevel just kills that path.
        let _ = self.get_analyses(toplevel, pos, 0, 0);
        self.local_stack.pop();
    }

    fn fresh_locals(&self) -> LocalVariables {
        LocalVariables {
            flag_state: self.alphabet.base().fd_table().start_state(),
            tape_step: 1,
            context: ContextCheck::None,
            context_placeholder: 0,
            max_context_length_remaining: self.max_context_length,
            pending_passthrough: false,
        }
    }

    fn pass_through(&self, output: &mut String, pos: usize) {
        if !self.extract_patterns {
            output.push_str(self.raw_symbol(self.input[pos]));
        }
    }

    fn commit_match(&mut self, output: &mut String, best: &Candidate) {
        let tag = self.tape_tag(&best.tape);
        if self.count_patterns || self.profile_mode {
            let name = if tag.is_empty() {
                self.tape_guard(&best.tape).unwrap_or("<unnamed>").to_string()
            } else {
                tag.clone()
            };
            *self.pattern_counts.entry(name).or_insert(0) += 1;
        }
        if self.verbose {
            eprintln!(
                "match at {}: {} symbols, weight {}",
                self.scan_pos, best.input_length, best.weight
            );
        }
        if self.delete_patterns {
            return;
        }
        let mut text = String::new();
        for pair in &best.tape {
            text.push_str(self.print_symbol(pair.output));
        }
        if self.mark_patterns && !tag.is_empty() {
            output.push('<');
            output.push_str(&tag);
            output.push('>');
            output.push_str(&text);
            output.push_str("</");
            output.push_str(&tag);
            output.push('>');
        } else {
            output.push_str(&text);
        }
        if self.extract_patterns {
            output.push('\n');
        }
    }

    fn locatefy(&self, pos: usize, candidate: &Candidate) -> Location {
        let mut input = String::new();
        for i in pos..pos + candidate.input_length {
            input.push_str(self.raw_symbol(self.input[i]));
        }
        let mut output = String::new();
        for pair in &candidate.tape {
            output.push_str(self.print_symbol(pair.output));
        }
        Location {
            start: self.char_offsets[pos],
            length: self.char_offsets[pos + candidate.input_length] - self.char_offsets[pos],
            input,
            output,
            tag: self.tape_tag(&candidate.tape),
            weight: candidate.weight,
        }
    }

    fn tape_tag(&self, tape: &[SymbolPair]) -> String {
        tape.iter()
            .rev()
            .find_map(|pair| {
                self.alphabet
                    .end_tag(pair.output)
                    .or_else(|| self.alphabet.end_tag(pair.input))
            })
            .unwrap_or("")
            .to_string()
    }

    fn tape_guard<'a>(&'a self, tape: &[SymbolPair]) -> Option<&'a str> {
        tape.iter().rev().find_map(|pair| {
            self.alphabet
                .guard_name(pair.output)
                .or_else(|| self.alphabet.guard_name(pair.input))
        })
    }

    fn raw_symbol(&self, symbol: SymbolNumber) -> &str {
        let base_count = self.alphabet.base().symbol_count();
        if symbol >= base_count {
            &self.transient_symbols[(symbol - base_count) as usize]
        } else {
            self.alphabet.base().string_from_symbol(symbol)
        }
    }

    fn print_symbol(&self, symbol: SymbolNumber) -> &str {
        let base_count = self.alphabet.base().symbol_count();
        if symbol >= base_count {
            &self.transient_symbols[(symbol - base_count) as usize]
        } else {
            self.alphabet.base().print_symbol(symbol)
        }
    }

    // ------------------------------------------------------------------
    // The depth-first interpreter
    // ------------------------------------------------------------------

    fn locals(&self) -> &LocalVariables {
        &self.local_stack[self.local_stack.len() - 1]
    }

    fn locals_mut(&mut self) -> &mut LocalVariables {
        let last = self.local_stack.len() - 1;
        &mut self.local_stack[last]
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

    fn get_analyses(
        &mut self,
        t: &'c PmatchTransducer,
        input_pos: usize,
        tape_pos: usize,
        i: TableIndex,
    ) -> Result<(), ContextTrap> {
        if self.out_of_time() || self.running_weight > self.weight_limit {
            return Ok(());
        }
        if self.recursion_depth_left == 0 {
            return Ok(());
        }
        self.recursion_depth_left -= 1;
        let result = self.get_analyses_inner(t, input_pos, tape_pos, i);
        self.recursion_depth_left += 1;
        result
    }

    fn get_analyses_inner(
        &mut self,
        t: &'c PmatchTransducer,
        input_pos: usize,
        tape_pos: usize,
        i: TableIndex,
    ) -> Result<(), ContextTrap> {
        self.take_epsilons(t, input_pos, tape_pos, i)?;
        self.take_specials(t, input_pos, tape_pos, i)?;
        if t.is_final(i) {
            self.handle_final_state(input_pos, tape_pos, t.final_weight(i))?;
        }
        self.take_transitions(t, input_pos, tape_pos, i)?;
        Ok(())
    }

    /// Plain epsilon and flag diacritic transitions.
    fn take_epsilons(
        &mut self,
        t: &'c PmatchTransducer,
        input_pos: usize,
        tape_pos: usize,
        i: TableIndex,
    ) -> Result<(), ContextTrap> {
        let alphabet = self.alphabet;
        let Some(mut cursor) = t.next_e(i) else {
            return Ok(());
        };
        loop {
            if self.limit_reached {
                return Ok(());
            }
            let tr = *t.transition(cursor);
            if tr.input == 0 {
                self.step(t, &tr, input_pos, tape_pos)?;
            } else if let Some(op) = alphabet.base().fd_table().get_operation(tr.input).copied() {
                if self.locals().pending_passthrough {
                    // Sliding over the pattern: flags are not evaluated.
                    self.step(t, &tr, input_pos, tape_pos)?;
                } else if alphabet.is_global_flag(tr.input) {
                    if self.global_flag_state.apply(&op) {
                        self.step(t, &tr, input_pos, tape_pos)?;
                    }
                } else {
                    let old_value = self.locals().flag_state.get(op.feature);
                    if self.locals_mut().flag_state.apply(&op) {
                        self.step(t, &tr, input_pos, tape_pos)?;
                    }
                    self.locals_mut().flag_state.set(op.feature, old_value);
                }
            } else {
                return Ok(());
            }
            cursor += 1;
        }
    }

    /// Probe the groups of every auxiliary symbol that traverses without
    /// consuming input.
    fn take_specials(
        &mut self,
        t: &'c PmatchTransducer,
        input_pos: usize,
        tape_pos: usize,
        i: TableIndex,
    ) -> Result<(), ContextTrap> {
        let alphabet = self.alphabet;
        for &symbol in alphabet.epsilon_like() {
            if self.limit_reached {
                return Ok(());
            }
            let Some(mut cursor) = t.next(i, symbol) else {
                continue;
            };
            while t.transition(cursor).input == symbol {
                let tr = *t.transition(cursor);
                self.dispatch_special(t, &tr, symbol, input_pos, tape_pos)?;
                cursor += 1;
            }
        }
        Ok(())
    }

    fn dispatch_special(
        &mut self,
        t: &'c PmatchTransducer,
        tr: &Transition,
        symbol: SymbolNumber,
        input_pos: usize,
        tape_pos: usize,
    ) -> Result<(), ContextTrap> {
        let alphabet = self.alphabet;
        if self.locals().pending_passthrough {
            // Only the matching exit ends a passthrough slide.
            let wanted = match self.locals().context {
                ContextCheck::Nlc => SpecialSymbol::NlcExit,
                ContextCheck::Nrc => SpecialSymbol::NrcExit,
                _ => return Ok(()),
            };
            if alphabet.special(symbol) == Some(wanted) {
                return self.exit_context(t, tr, tape_pos);
            }
            return Ok(());
        }
        match alphabet.special(symbol) {
            Some(SpecialSymbol::Entry) => {
                self.entry_stack.push(input_pos);
                let result = self.step(t, tr, input_pos, tape_pos);
                self.entry_stack.pop();
                result
            }
            Some(SpecialSymbol::Exit) => {
                let saved = self.entry_stack.pop();
                let result = self.step(t, tr, input_pos, tape_pos);
                if let Some(saved) = saved {
                    self.entry_stack.push(saved);
                }
                result
            }
            Some(SpecialSymbol::LcEntry) => {
                self.check_context(t, tr, ContextCheck::Lc, input_pos, tape_pos)
            }
            Some(SpecialSymbol::RcEntry) => {
                self.check_context(t, tr, ContextCheck::Rc, input_pos, tape_pos)
            }
            Some(SpecialSymbol::NlcEntry) => {
                self.check_context(t, tr, ContextCheck::Nlc, input_pos, tape_pos)
            }
            Some(SpecialSymbol::NrcEntry) => {
                self.check_context(t, tr, ContextCheck::Nrc, input_pos, tape_pos)
            }
            Some(SpecialSymbol::LcExit) if self.locals().context == ContextCheck::Lc => {
                self.exit_context(t, tr, tape_pos)
            }
            Some(SpecialSymbol::RcExit) if self.locals().context == ContextCheck::Rc => {
                self.exit_context(t, tr, tape_pos)
            }
            Some(SpecialSymbol::NlcExit) if self.locals().context == ContextCheck::Nlc => {
                Err(ContextTrap)
            }
            Some(SpecialSymbol::NrcExit) if self.locals().context == ContextCheck::Nrc => {
                Err(ContextTrap)
            }
            Some(SpecialSymbol::LcExit)
            | Some(SpecialSymbol::RcExit)
            | Some(SpecialSymbol::NlcExit)
            | Some(SpecialSymbol::NrcExit)
            | Some(SpecialSymbol::Passthrough)
            | Some(SpecialSymbol::Boundary) => Ok(()),
            Some(SpecialSymbol::InputMark) => self.step(t, tr, input_pos, tape_pos),
            None => {
                if self.rtns.contains_key(&symbol) {
                    self.rtn_call(t, tr, symbol, input_pos, tape_pos)
                } else if let Some(name) = alphabet.capture_name(symbol) {
                    let name = name.to_string();
                    self.open_captures.push(OpenCapture {
                        name,
                        begin: input_pos,
                    });
                    let result = self.step(t, tr, input_pos, tape_pos);
                    self.open_captures.pop();
                    result
                } else if let Some(name) = alphabet.captured_name(symbol) {
                    let name = name.to_string();
                    self.handle_captured(t, tr, &name, input_pos, tape_pos)
                } else if let Some(name) = alphabet.counter_name(symbol) {
                    *self.counters.entry(name.to_string()).or_insert(0) += 1;
                    self.step(t, tr, input_pos, tape_pos)
                } else if alphabet.guard_name(symbol).is_some()
                    || alphabet.end_tag(symbol).is_some()
                {
                    self.step(t, tr, input_pos, tape_pos)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Traverse one no-input transition: write the tape unless inside a
    /// context, accumulate the weight, recurse into the target.
    fn step(
        &mut self,
        t: &'c PmatchTransducer,
        tr: &Transition,
        input_pos: usize,
        tape_pos: usize,
    ) -> Result<(), ContextTrap> {
        let in_context = self.locals().context != ContextCheck::None;
        let next_tape_pos = if in_context {
            tape_pos
        } else {
            self.tape_write(tape_pos, tr.input, tr.output);
            tape_pos + 1
        };
        self.running_weight += tr.weight;
        let result = self.get_analyses(t, input_pos, next_tape_pos, tr.target);
        self.running_weight -= tr.weight;
        result
    }

    fn tape_write(&mut self, pos: usize, input: SymbolNumber, output: SymbolNumber) {
        let pair = SymbolPair { input, output };
        if pos < self.tape.len() {
            self.tape[pos] = pair;
        } else {
            self.tape.push(pair);
        }
    }

    // ------------------------------------------------------------------
    // Contexts
    // ------------------------------------------------------------------

    fn check_context(
        &mut self,
        t: &'c PmatchTransducer,
        tr: &Transition,
        kind: ContextCheck,
        input_pos: usize,
        tape_pos: usize,
    ) -> Result<(), ContextTrap> {
        let mut locals = self.locals().clone();
        locals.context = kind;
        locals.tape_step = match kind {
            ContextCheck::Lc | ContextCheck::Nlc => -1,
            _ => 1,
        };
        locals.context_placeholder = input_pos;
        locals.max_context_length_remaining = self.max_context_length;
        locals.pending_passthrough = false;
        self.local_stack.push(locals);
        let probe = self.step(t, tr, input_pos, tape_pos);
        self.local_stack.pop();

        match kind {
            ContextCheck::Lc | ContextCheck::Rc => probe,
            ContextCheck::Nlc | ContextCheck::Nrc => match probe {
                // The negative context matched: this path is dead, the
                // search as a whole goes on.
                Err(ContextTrap) => Ok(()),
                Ok(()) => {
                    // Context absent; slide to the exit and continue there.
                    let mut locals = self.locals().clone();
                    locals.context = kind;
                    locals.tape_step = 1;
                    locals.context_placeholder = input_pos;
                    locals.max_context_length_remaining = self.max_context_length;
                    locals.pending_passthrough = true;
                    self.local_stack.push(locals);
                    let result = self.step(t, tr, input_pos, tape_pos);
                    self.local_stack.pop();
                    result
                }
            },
            ContextCheck::None => Ok(()),
        }
    }

    /// A positive exit, or the end of a passthrough slide: restore the
    /// entry position and continue outside the context.
    fn exit_context(
        &mut self,
        t: &'c PmatchTransducer,
        tr: &Transition,
        tape_pos: usize,
    ) -> Result<(), ContextTrap> {
        let locals = self.local_stack.pop();
        let placeholder = locals
            .as_ref()
            .map(|l| l.context_placeholder)
            .unwrap_or(0);
        let result = self.step(t, tr, placeholder, tape_pos);
        if let Some(locals) = locals {
            self.local_stack.push(locals);
        }
        result
    }

    // ------------------------------------------------------------------
    // Network calls
    // ------------------------------------------------------------------

    fn rtn_call(
        &mut self,
        t: &'c PmatchTransducer,
        tr: &Transition,
        symbol: SymbolNumber,
        input_pos: usize,
        tape_pos: usize,
    ) -> Result<(), ContextTrap> {
        let rtns = self.rtns;
        let Some(callee) = rtns.get(&symbol) else {
            return Ok(());
        };
        // The callee starts from a value copy of the interpreter state but
        // a fresh flag state; a failing callee cannot corrupt the caller.
        let mut locals = self.locals().clone();
        locals.flag_state = self.alphabet.base().fd_table().start_state();
        self.rtn_stack.push(RtnFrame {
            caller: t,
            caller_index: tr.target,
        });
        self.local_stack.push(locals);
        self.running_weight += tr.weight;
        let result = self.get_analyses(callee, input_pos, tape_pos, 0);
        self.running_weight -= tr.weight;
        self.local_stack.pop();
        self.rtn_stack.pop();
        result
    }

    fn handle_final_state(
        &mut self,
        input_pos: usize,
        tape_pos: usize,
        final_weight: Weight,
    ) -> Result<(), ContextTrap> {
        if let Some(frame) = self.rtn_stack.pop() {
            // Return to the caller and keep exploring from there.
            let locals = self.local_stack.pop();
            self.running_weight += final_weight;
            let result = self.get_analyses(frame.caller, input_pos, tape_pos, frame.caller_index);
            self.running_weight -= final_weight;
            if let Some(locals) = locals {
                self.local_stack.push(locals);
            }
            self.rtn_stack.push(frame);
            return result;
        }
        if self.locals().context != ContextCheck::None {
            return Ok(());
        }
        self.note_analysis(input_pos, tape_pos, final_weight);
        Ok(())
    }

    fn note_analysis(&mut self, input_pos: usize, tape_pos: usize, final_weight: Weight) {
        let weight = self.running_weight + final_weight;
        if weight > self.weight_limit {
            return;
        }
        let candidate = Candidate {
            tape: self.tape[..tape_pos].to_vec(),
            input_length: input_pos - self.scan_pos,
            weight,
        };
        let better = match &self.best {
            None => true,
            Some(best) => {
                candidate.input_length > best.input_length
                    || (candidate.input_length == best.input_length && weight < best.weight)
            }
        };
        if self.locate_mode {
            self.candidates.push(candidate.clone());
        }
        if better {
            if !self.locate_mode {
                // Tighten the pruning limit to the best weight found.
                self.weight_limit = weight;
            }
            self.best = Some(candidate);
        }
    }

    // ------------------------------------------------------------------
    // Input consumption
    // ------------------------------------------------------------------

    fn take_transitions(
        &mut self,
        t: &'c PmatchTransducer,
        input_pos: usize,
        tape_pos: usize,
        i: TableIndex,
    ) -> Result<(), ContextTrap> {
        let alphabet = self.alphabet;
        let in_context = self.locals().context != ContextCheck::None;
        let backward = self.locals().tape_step < 0;

        if self.locals().pending_passthrough {
            return self.passthrough_slide(t, input_pos, tape_pos, i);
        }
        if in_context && self.locals().max_context_length_remaining == 0 {
            return Ok(());
        }

        let at_edge = if backward {
            input_pos == 0
        } else {
            input_pos >= self.input.len()
        };
        if at_edge {
            // Only the virtual boundary can match beyond the text.
            if let Some(boundary) = alphabet.special_number(SpecialSymbol::Boundary) {
                self.consume_group(t, i, boundary, None, input_pos, tape_pos)?;
            }
            return Ok(());
        }

        let read_pos = if backward { input_pos - 1 } else { input_pos };
        let symbol = self.input[read_pos];
        let next_pos = if backward { input_pos - 1 } else { input_pos + 1 };
        let base = alphabet.base();

        let mut found = false;
        if symbol < base.symbol_count() {
            found |= self.consume_group(t, i, symbol, Some((symbol, next_pos)), input_pos, tape_pos)?;
        } else {
            if let Some(identity) = base.identity_symbol() {
                found |=
                    self.consume_group(t, i, identity, Some((symbol, next_pos)), input_pos, tape_pos)?;
            }
            if let Some(unknown) = base.unknown_symbol() {
                found |=
                    self.consume_group(t, i, unknown, Some((symbol, next_pos)), input_pos, tape_pos)?;
            }
        }
        for (list_symbol, list) in alphabet.lists() {
            if list.admits(symbol) {
                found |= self.consume_group(
                    t,
                    i,
                    list_symbol,
                    Some((symbol, next_pos)),
                    input_pos,
                    tape_pos,
                )?;
            }
        }
        if !found
            && let Some(default) = base.default_symbol()
        {
            self.consume_group(t, i, default, Some((symbol, next_pos)), input_pos, tape_pos)?;
        }
        Ok(())
    }

    /// Walk one transition group. `consumed` carries the actual input
    /// symbol and the position after it; `None` means a boundary probe that
    /// moves nothing.
    fn consume_group(
        &mut self,
        t: &'c PmatchTransducer,
        i: TableIndex,
        match_symbol: SymbolNumber,
        consumed: Option<(SymbolNumber, usize)>,
        input_pos: usize,
        tape_pos: usize,
    ) -> Result<bool, ContextTrap> {
        let Some(mut cursor) = t.next(i, match_symbol) else {
            return Ok(false);
        };
        let mut found = false;
        while t.transition(cursor).input == match_symbol {
            if self.limit_reached {
                return Ok(found);
            }
            let tr = *t.transition(cursor);
            found = true;
            let (actual, next_pos) = consumed.unwrap_or((match_symbol, input_pos));
            // Identity-style outputs stand for the symbol that was read.
            let output = if tr.output == match_symbol && match_symbol != actual {
                actual
            } else {
                tr.output
            };
            let in_context = self.locals().context != ContextCheck::None;
            let next_tape_pos = if in_context {
                tape_pos
            } else {
                self.tape_write(tape_pos, actual, output);
                tape_pos + 1
            };
            if in_context {
                self.locals_mut().max_context_length_remaining -= 1;
            }
            self.running_weight += tr.weight;
            let result = self.get_analyses(t, next_pos, next_tape_pos, tr.target);
            self.running_weight -= tr.weight;
            if in_context {
                self.locals_mut().max_context_length_remaining += 1;
            }
            result?;
            cursor += 1;
        }
        Ok(found)
    }

    /// Slide over a verified-absent negative context pattern without
    /// consuming anything, until its exit symbol turns up.
    fn passthrough_slide(
        &mut self,
        t: &'c PmatchTransducer,
        input_pos: usize,
        tape_pos: usize,
        i: TableIndex,
    ) -> Result<(), ContextTrap> {
        if self.locals().max_context_length_remaining == 0 {
            return Ok(());
        }
        let alphabet = self.alphabet;
        for (symbol, mut cursor) in state_groups(alphabet, t, i) {
            // Epsilons and flags are already slid over by the caller;
            // auxiliary symbols other than the exit dead-end the slide.
            if symbol == 0
                || alphabet.base().is_flag_diacritic(symbol)
                || alphabet.special(symbol).is_some()
                || alphabet.rtn_name(symbol).is_some()
                || alphabet.capture_name(symbol).is_some()
                || alphabet.captured_name(symbol).is_some()
                || alphabet.counter_name(symbol).is_some()
                || alphabet.guard_name(symbol).is_some()
                || alphabet.end_tag(symbol).is_some()
            {
                continue;
            }
            while t.transition(cursor).input == symbol {
                let tr = *t.transition(cursor);
                self.locals_mut().max_context_length_remaining -= 1;
                let result = self.get_analyses(t, input_pos, tape_pos, tr.target);
                self.locals_mut().max_context_length_remaining += 1;
                result?;
                cursor += 1;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Captures
    // ------------------------------------------------------------------

    fn handle_captured(
        &mut self,
        t: &'c PmatchTransducer,
        tr: &Transition,
        name: &str,
        input_pos: usize,
        tape_pos: usize,
    ) -> Result<(), ContextTrap> {
        if let Some(open_index) = self.open_captures.iter().rposition(|c| c.name == name) {
            // Close the innermost open capture of this name.
            let open = self.open_captures.remove(open_index);
            self.captures.push(Capture {
                name: open.name.clone(),
                begin: open.begin,
                end: input_pos,
            });
            let result = self.step(t, tr, input_pos, tape_pos);
            self.captures.pop();
            self.open_captures.insert(open_index, open);
            return result;
        }

        // Back-reference: the longest closed capture of this name whose
        // content repeats at the current position.
        let mut spans: Vec<(usize, usize)> = self
            .captures
            .iter()
            .filter(|c| c.name == name)
            .map(|c| (c.begin, c.end))
            .collect();
        spans.sort_by_key(|(begin, end)| usize::MAX - (end - begin));
        for (begin, end) in spans {
            let length = end - begin;
            if input_pos + length > self.input.len() {
                continue;
            }
            if (0..length).any(|k| self.input[begin + k] != self.input[input_pos + k]) {
                continue;
            }
            let in_context = self.locals().context != ContextCheck::None;
            let mut next_tape_pos = tape_pos;
            if !in_context {
                for k in 0..length {
                    let symbol = self.input[input_pos + k];
                    self.tape_write(next_tape_pos, symbol, symbol);
                    next_tape_pos += 1;
                }
            }
            self.running_weight += tr.weight;
            let result = self.get_analyses(t, input_pos + length, next_tape_pos, tr.target);
            self.running_weight -= tr.weight;
            return result;
        }
        Ok(())
    }
}

/// Tokenize against the container's encoder, or per codepoint when that
/// mode is on. Out-of-alphabet codepoints get transient numbers above the
/// alphabet.
fn tokenize(container: &PmatchContainer, input: &str) -> (Vec<SymbolNumber>, Vec<String>) {
    let base = container.alphabet.base();
    let mut symbols = Vec::new();
    let mut transients: Vec<String> = Vec::new();
    let mut transient_numbers: HashMap<String, SymbolNumber> = HashMap::new();
    let push_transient =
        |text: String, transients: &mut Vec<String>, map: &mut HashMap<String, SymbolNumber>| {
            *map.entry(text.clone()).or_insert_with(|| {
                let number = base.symbol_count() as usize + transients.len();
                transients.push(text);
                number.min(NO_SYMBOL as usize - 1) as SymbolNumber
            })
        };

    if container.single_codepoint_tokenization {
        let map = base.build_string_symbol_map();
        for ch in input.chars() {
            let text = ch.to_string();
            match map.get(&text) {
                Some(&symbol) => symbols.push(symbol),
                None => {
                    symbols.push(push_transient(text, &mut transients, &mut transient_numbers))
                }
            }
        }
        return (symbols, transients);
    }

    let mut offset = 0;
    let mut cursor = input.as_bytes();
    while offset < input.len() {
        if let Some(symbol) = container.encoder.find_key(&mut cursor) {
            offset = input.len() - cursor.len();
            symbols.push(symbol);
            continue;
        }
        let Some(ch) = input[offset..].chars().next() else {
            break;
        };
        symbols.push(push_transient(
            ch.to_string(),
            &mut transients,
            &mut transient_numbers,
        ));
        offset += ch.len_utf8();
        cursor = &input.as_bytes()[offset..];
    }
    (symbols, transients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use louhi_fst::INFINITE_WEIGHT;
    use louhi_fst::alphabet::EPSILON_STRING;
    use louhi_fst::convert::TransducerBuilder;

    /// Compile a member over a fixed symbol list so that every member of a
    /// container shares one numbering.
    fn compile(symbols: &[&str], build: impl FnOnce(&mut TransducerBuilder)) -> Transducer {
        let mut b = TransducerBuilder::new(true);
        for s in symbols {
            b.add_symbol(s);
        }
        build(&mut b);
        b.build().unwrap()
    }

    fn container(toplevel: Transducer, rtns: Vec<(String, Transducer)>) -> PmatchContainer {
        PmatchContainer::from_transducers(toplevel, rtns).unwrap()
    }

    const CAT_SYMBOLS: [&str; 6] = [
        "@PMATCH_ENTRY@",
        "@PMATCH_EXIT@",
        "@PMATCH_ENDTAG_noun@",
        "c",
        "a",
        "t",
    ];

    /// The word "cat" wrapped in entry/exit markers and a `noun` end tag.
    fn cat_container() -> PmatchContainer {
        let top = compile(&CAT_SYMBOLS, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "@PMATCH_ENTRY@", "@PMATCH_ENTRY@", s1, 0.0);
            let end = b.add_path(s1, &[("c", "c"), ("a", "a"), ("t", "t")], 0.0);
            let tagged = b.add_state();
            b.add_arc(end, "@PMATCH_ENDTAG_noun@", "@PMATCH_ENDTAG_noun@", tagged, 0.0);
            let done = b.add_state();
            b.add_arc(tagged, "@PMATCH_EXIT@", "@PMATCH_EXIT@", done, 0.0);
            b.set_final(done, 0.0);
        });
        container(top, Vec::new())
    }

    #[test]
    fn locate_finds_cat_in_running_text() {
        let mut c = cat_container();
        let locations = c.locate("the cat sat", 0.0, INFINITE_WEIGHT);
        // Scanned positions: t h e ␣ c(match) ␣ s a t -- nine in all.
        assert_eq!(locations.len(), 9);
        for (i, v) in locations.iter().enumerate() {
            if i == 4 {
                assert_eq!(v.len(), 1);
            } else {
                assert!(v.is_empty(), "unexpected match at scan step {i}");
            }
        }
        let location = &locations[4][0];
        assert_eq!(location.start, 4);
        assert_eq!(location.length, 3);
        assert_eq!(location.input, "cat");
        assert_eq!(location.output, "cat");
        assert_eq!(location.tag, "noun");
        assert_eq!(location.weight, 0.0);
    }

    #[test]
    fn match_mode_passes_text_through() {
        let mut c = cat_container();
        assert_eq!(c.match_text("the cat sat", 0.0, INFINITE_WEIGHT), "the cat sat");
    }

    #[test]
    fn delete_patterns_removes_matches() {
        let mut c = cat_container();
        c.set_delete_patterns(true);
        assert_eq!(c.match_text("the cat sat", 0.0, INFINITE_WEIGHT), "the  sat");
    }

    #[test]
    fn mark_patterns_wraps_matches_in_their_tag() {
        let mut c = cat_container();
        c.set_mark_patterns(true);
        assert_eq!(
            c.match_text("the cat sat", 0.0, INFINITE_WEIGHT),
            "the <noun>cat</noun> sat"
        );
    }

    #[test]
    fn extract_patterns_keeps_only_matches() {
        let mut c = cat_container();
        c.set_extract_patterns(true);
        assert_eq!(c.match_text("a cat, a cat", 0.0, INFINITE_WEIGHT), "cat\ncat\n");
    }

    #[test]
    fn count_patterns_tallies_by_tag() {
        let mut c = cat_container();
        c.set_count_patterns(true);
        c.match_text("cat cat", 0.0, INFINITE_WEIGHT);
        assert_eq!(c.pattern_counts().get("noun"), Some(&2));
        assert!(c.get_pattern_count_info().contains("noun\t2"));
    }

    #[test]
    fn rtn_call_and_return() {
        let symbols = ["@I.X@", "a", "b", "z"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "@I.X@", EPSILON_STRING, s1, 0.0);
            b.set_final(s1, 0.0);
        });
        let x = compile(&symbols, |b| {
            let end = b.add_path(0, &[("a", "a"), ("b", "b")], 0.0);
            b.set_final(end, 0.0);
        });
        let mut c = container(top, vec![("X".to_string(), x)]);
        let locations = c.locate("zabz", 0.0, INFINITE_WEIGHT);
        assert_eq!(locations.len(), 3);
        assert!(locations[0].is_empty());
        assert_eq!(locations[1].len(), 1);
        assert_eq!(locations[1][0].start, 1);
        assert_eq!(locations[1][0].input, "ab");
        assert!(locations[2].is_empty());
    }

    #[test]
    fn unsatisfied_rtn_is_an_error() {
        let top = compile(&["@I.Y@", "a"], |b| {
            let s1 = b.add_state();
            b.add_arc(0, "@I.Y@", EPSILON_STRING, s1, 0.0);
            b.set_final(s1, 0.0);
        });
        match PmatchContainer::from_transducers(top, Vec::new()) {
            Err(PmatchError::UnsatisfiedRtn { name }) => assert_eq!(name, "Y"),
            other => panic!("expected an unsatisfied-RTN error, got {:?}", other.is_ok()),
        }
    }

    /// `a` only before `b`.
    fn right_context_container(negative: bool) -> PmatchContainer {
        let (entry, exit) = if negative {
            ("@PMATCH_NRC_ENTRY@", "@PMATCH_NRC_EXIT@")
        } else {
            ("@PMATCH_RC_ENTRY@", "@PMATCH_RC_EXIT@")
        };
        let symbols = [entry, exit, "a", "b"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "a", "a", s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, entry, entry, s2, 0.0);
            let s3 = b.add_state();
            b.add_arc(s2, "b", "b", s3, 0.0);
            let s4 = b.add_state();
            b.add_arc(s3, exit, exit, s4, 0.0);
            b.set_final(s4, 0.0);
        });
        container(top, Vec::new())
    }

    #[test]
    fn positive_right_context() {
        let mut c = right_context_container(false);
        let hits = c.locate("ab", 0.0, INFINITE_WEIGHT);
        assert_eq!(hits[0].len(), 1);
        assert_eq!(hits[0][0].input, "a");
        assert_eq!(hits[0][0].length, 1);

        let misses = c.locate("aa", 0.0, INFINITE_WEIGHT);
        assert!(misses.iter().all(Vec::is_empty));
    }

    #[test]
    fn negative_right_context() {
        let mut c = right_context_container(true);
        let blocked = c.locate("ab", 0.0, INFINITE_WEIGHT);
        assert!(blocked.iter().all(Vec::is_empty));

        let allowed = c.locate("aa", 0.0, INFINITE_WEIGHT);
        assert_eq!(allowed[0].len(), 1);
        assert_eq!(allowed[0][0].input, "a");

        // At the end of the text the context is vacuously absent.
        let at_end = c.locate("a", 0.0, INFINITE_WEIGHT);
        assert_eq!(at_end[0].len(), 1);
    }

    #[test]
    fn positive_left_context() {
        let symbols = ["@PMATCH_LC_ENTRY@", "@PMATCH_LC_EXIT@", "a", "b"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "@PMATCH_LC_ENTRY@", "@PMATCH_LC_ENTRY@", s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, "a", "a", s2, 0.0);
            let s3 = b.add_state();
            b.add_arc(s2, "@PMATCH_LC_EXIT@", "@PMATCH_LC_EXIT@", s3, 0.0);
            let s4 = b.add_state();
            b.add_arc(s3, "b", "b", s4, 0.0);
            b.set_final(s4, 0.0);
        });
        let mut c = container(top, Vec::new());
        let locations = c.locate("ab", 0.0, INFINITE_WEIGHT);
        assert_eq!(locations.len(), 2);
        assert!(locations[0].is_empty());
        assert_eq!(locations[1].len(), 1);
        assert_eq!(locations[1][0].start, 1);
        assert_eq!(locations[1][0].input, "b");

        // Without the left neighbor there is no match.
        let misses = c.locate("b", 0.0, INFINITE_WEIGHT);
        assert!(misses.iter().all(Vec::is_empty));
    }

    #[test]
    fn captures_back_reference_doubled_letters() {
        let symbols = ["@PMATCH_CAPTURE_x@", "@PMATCH_CAPTURED_x@", "a", "b"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "@PMATCH_CAPTURE_x@", "@PMATCH_CAPTURE_x@", s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, "a", "a", s2, 0.0);
            b.add_arc(s1, "b", "b", s2, 0.0);
            let s3 = b.add_state();
            b.add_arc(s2, "@PMATCH_CAPTURED_x@", "@PMATCH_CAPTURED_x@", s3, 0.0);
            let s4 = b.add_state();
            b.add_arc(s3, "@PMATCH_CAPTURED_x@", "@PMATCH_CAPTURED_x@", s4, 0.0);
            b.set_final(s4, 0.0);
        });
        let mut c = container(top, Vec::new());

        let doubled = c.locate("aa", 0.0, INFINITE_WEIGHT);
        assert_eq!(doubled[0].len(), 1);
        assert_eq!(doubled[0][0].input, "aa");
        assert_eq!(doubled[0][0].output, "aa");

        let mixed = c.locate("ab", 0.0, INFINITE_WEIGHT);
        assert!(mixed.iter().all(Vec::is_empty));

        assert_eq!(c.locate("bb", 0.0, INFINITE_WEIGHT)[0].len(), 1);
    }

    #[test]
    fn counters_tally_during_matching() {
        let symbols = ["@PMATCH_COUNTER_hits@", "a"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "@PMATCH_COUNTER_hits@", EPSILON_STRING, s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, "a", "a", s2, 0.0);
            b.set_final(s2, 0.0);
        });
        let mut c = container(top, Vec::new());
        c.match_text("a", 0.0, INFINITE_WEIGHT);
        assert_eq!(c.counters().get("hits"), Some(&1));
    }

    fn flag_gated_rtn(global: bool) -> PmatchContainer {
        let (set, require) = if global {
            ("@P.G_Seen.x@", "@R.G_Seen.x@")
        } else {
            ("@P.Seen.x@", "@R.Seen.x@")
        };
        let symbols = [set, require, "@I.X@", "a"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, set, set, s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, "@I.X@", EPSILON_STRING, s2, 0.0);
            b.set_final(s2, 0.0);
        });
        let x = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, require, require, s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, "a", "a", s2, 0.0);
            b.set_final(s2, 0.0);
        });
        container(top, vec![("X".to_string(), x)])
    }

    #[test]
    fn global_flags_cross_network_calls() {
        let mut c = flag_gated_rtn(true);
        let hits = c.locate("a", 0.0, INFINITE_WEIGHT);
        assert_eq!(hits[0].len(), 1);
    }

    #[test]
    fn local_flags_are_value_copied_per_call() {
        // The callee starts with a fresh flag state, so the require fails.
        let mut c = flag_gated_rtn(false);
        let hits = c.locate("a", 0.0, INFINITE_WEIGHT);
        assert!(hits.iter().all(Vec::is_empty));
    }

    #[test]
    fn best_candidate_prefers_longer_matches() {
        let symbols = ["a", "b"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "a", "a", s1, 2.0);
            b.set_final(s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(s1, "b", "b", s2, 0.0);
            b.set_final(s2, 0.0);
        });
        let mut c = container(top, Vec::new());
        c.set_delete_patterns(true);
        // The two-symbol match wins and the whole input is deleted.
        assert_eq!(c.match_text("ab", 0.0, INFINITE_WEIGHT), "");
    }

    #[test]
    fn equal_length_ties_break_by_weight() {
        let symbols = ["a", "x", "y"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "a", "x", s1, 2.0);
            b.set_final(s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(0, "a", "y", s2, 1.0);
            b.set_final(s2, 0.0);
        });
        let mut c = container(top, Vec::new());
        assert_eq!(c.match_text("a", 0.0, INFINITE_WEIGHT), "y");

        // Locate keeps both, lightest first.
        let locations = c.locate("a", 0.0, INFINITE_WEIGHT);
        assert_eq!(locations[0].len(), 2);
        assert_eq!(locations[0][0].output, "y");
        assert_eq!(locations[0][0].weight, 1.0);
        assert_eq!(locations[0][1].output, "x");
    }

    #[test]
    fn weight_cutoff_drops_heavy_candidates() {
        let symbols = ["a", "x", "y"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "a", "x", s1, 2.0);
            b.set_final(s1, 0.0);
            let s2 = b.add_state();
            b.add_arc(0, "a", "y", s2, 1.0);
            b.set_final(s2, 0.0);
        });
        let mut c = container(top, Vec::new());
        let locations = c.locate("a", 0.0, 1.5);
        assert_eq!(locations[0].len(), 1);
        assert_eq!(locations[0][0].output, "y");
    }

    #[test]
    fn archive_round_trip() {
        let c = cat_container();
        let mut buf = Vec::new();
        c.write(&mut buf).unwrap();

        let mut read_back = PmatchContainer::from_bytes(&buf).unwrap();
        let locations = read_back.locate("the cat sat", 0.0, INFINITE_WEIGHT);
        assert_eq!(locations[4].len(), 1);
        assert_eq!(locations[4][0].input, "cat");
        assert_eq!(locations[4][0].tag, "noun");
    }

    #[test]
    fn bad_archive_is_rejected() {
        assert!(matches!(
            PmatchContainer::from_bytes(b"nope"),
            Err(PmatchError::BadArchive(_))
        ));
    }

    #[test]
    fn single_codepoint_tokenization_mode() {
        // "ch" is a multicharacter symbol; with single-codepoint
        // tokenization it can no longer match.
        let symbols = ["ch", "c", "h"];
        let top = compile(&symbols, |b| {
            let s1 = b.add_state();
            b.add_arc(0, "ch", "ch", s1, 0.0);
            b.set_final(s1, 0.0);
        });
        let mut c = container(top, Vec::new());
        assert_eq!(c.locate("ch", 0.0, INFINITE_WEIGHT)[0].len(), 1);

        c.set_single_codepoint_tokenization(true);
        let split = c.locate("ch", 0.0, INFINITE_WEIGHT);
        assert!(split.iter().all(Vec::is_empty));
    }
}
