// Packing an in-memory transducer graph into the two-table OL layout.
//
// Only states with more than one distinct input symbol need a row in the
// transition-index table; single-input states are entered directly in the
// transition table. Rows are packed greedily into the index table, densest
// states first, overlapping where their occupied cells do not collide.

use crate::alphabet::{EPSILON_STRING, TransducerAlphabet};
use crate::flags::parse_flag_string;
use crate::header::TransducerHeader;
use crate::tables::{Transition, TransitionIndex, TransducerTables};
use crate::transducer::Transducer;
use crate::{OlError, SymbolNumber, TRANSITION_TARGET_TABLE_START, TableIndex, Weight};
use hashbrown::{HashMap, HashSet};

/// Fraction of a row's cells that may already be occupied before a packing
/// position is rejected as too full.
const PACKING_AGGRESSION: f32 = 0.25;

/// A builder arc, targets named by state id.
#[derive(Debug, Clone, Copy)]
struct ArcPlaceholder {
    input: SymbolNumber,
    output: SymbolNumber,
    target: u32,
    weight: Weight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateKind {
    Empty,
    SimpleZeroIndex,
    SimpleNonzeroIndex,
    Nonsimple,
}

/// One state's transitions grouped by input symbol, in layout order:
/// epsilon first, then flag diacritics, then other inputs ascending.
#[derive(Debug)]
struct StatePlaceholder {
    groups: Vec<(SymbolNumber, Vec<ArcPlaceholder>)>,
    kind: StateKind,
    final_weight: Option<Weight>,
    /// Index-table base, for nonsimple states once packed.
    start_index: Option<TableIndex>,
    /// Position of the state's boundary cell in the transition table.
    boundary: TableIndex,
}

impl StatePlaceholder {
    fn new(
        state: u32,
        arcs: &[ArcPlaceholder],
        final_weight: Option<Weight>,
        flag_symbols: &HashSet<SymbolNumber>,
    ) -> Self {
        let mut by_input: HashMap<SymbolNumber, Vec<ArcPlaceholder>> = HashMap::new();
        for arc in arcs {
            by_input.entry(arc.input).or_default().push(*arc);
        }
        let mut groups: Vec<(SymbolNumber, Vec<ArcPlaceholder>)> = by_input.into_iter().collect();
        let class = |s: SymbolNumber| -> u8 {
            if s == 0 {
                0
            } else if flag_symbols.contains(&s) {
                1
            } else {
                2
            }
        };
        groups.sort_by_key(|(s, _)| (class(*s), *s));

        let mut kind = StateKind::Empty;
        for (symbol, _) in &groups {
            let zero_indexed = class(*symbol) < 2;
            kind = match kind {
                StateKind::Empty => {
                    if zero_indexed {
                        StateKind::SimpleZeroIndex
                    } else {
                        StateKind::SimpleNonzeroIndex
                    }
                }
                StateKind::SimpleZeroIndex => {
                    if zero_indexed {
                        StateKind::SimpleZeroIndex
                    } else {
                        StateKind::Nonsimple
                    }
                }
                StateKind::SimpleNonzeroIndex | StateKind::Nonsimple => StateKind::Nonsimple,
            };
        }
        // The start state is the entry point and always gets a full row.
        if state == 0 {
            kind = StateKind::Nonsimple;
        }

        Self {
            groups,
            kind,
            final_weight,
            start_index: None,
            boundary: 0,
        }
    }

    fn is_simple(&self) -> bool {
        self.kind != StateKind::Nonsimple
    }

    fn transition_count(&self) -> usize {
        self.groups.iter().map(|(_, g)| g.len()).sum()
    }

    fn input_count(&self) -> usize {
        self.groups.len()
    }

    /// The distinct index-row cell keys this state occupies: 0 for the
    /// merged epsilon-and-flag slot, the input symbol itself otherwise.
    fn cell_keys(&self, flag_symbols: &HashSet<SymbolNumber>) -> Vec<SymbolNumber> {
        let mut keys = Vec::with_capacity(self.groups.len());
        for (symbol, _) in &self.groups {
            let key = if *symbol == 0 || flag_symbols.contains(symbol) {
                0
            } else {
                *symbol
            };
            if keys.last() != Some(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Offset of input `symbol`'s first transition within the state's run.
    fn symbol_offset(
        &self,
        symbol: SymbolNumber,
        flag_symbols: &HashSet<SymbolNumber>,
    ) -> Result<u32, OlError> {
        if symbol == 0 || flag_symbols.contains(&symbol) {
            return Ok(0);
        }
        let mut offset = 0u32;
        for (group_symbol, group) in &self.groups {
            if *group_symbol == symbol {
                return Ok(offset);
            }
            offset += group.len() as u32;
        }
        Err(OlError::FatalInternal(format!(
            "symbol offset requested for input {symbol} not present in state"
        )))
    }
}

/// The index table under construction: a free-slot bitmap over cells, so
/// that rows of different states may interleave.
#[derive(Debug, Default)]
struct IndexPlaceholders {
    used: Vec<bool>,
    cells: Vec<TransitionIndex>,
}

impl IndexPlaceholders {
    fn used(&self, position: usize) -> bool {
        self.used.get(position).copied().unwrap_or(false)
    }

    fn assign(&mut self, position: usize, cell: TransitionIndex) {
        while self.cells.len() <= position {
            self.cells.push(TransitionIndex::EMPTY);
            self.used.push(false);
        }
        self.cells[position] = cell;
        self.used[position] = true;
    }

    /// Whether the state's cells all land on free slots at `position`.
    fn fits(&self, keys: &[SymbolNumber], position: usize) -> bool {
        if self.used(position) {
            return false;
        }
        keys.iter()
            .all(|key| !self.used(position + 1 + *key as usize))
    }

    /// Cheap pre-filter: reject a position whose row span is already too
    /// crowded to be worth the full fit check.
    fn unsuitable(&self, position: usize, row_width: usize) -> bool {
        if self.used(position) {
            return true;
        }
        let allowed = (PACKING_AGGRESSION * row_width as f32).max(1.0) as usize;
        let mut filled = 0;
        for i in 0..row_width {
            filled += self.used(position + 1 + i) as usize;
            if filled >= allowed {
                return true;
            }
        }
        false
    }
}

/// An in-memory transducer under construction: states with weighted arcs
/// and an interned symbol table. `build` packs it into a [`Transducer`].
#[derive(Debug)]
pub struct TransducerBuilder {
    symbols: Vec<String>,
    symbol_numbers: HashMap<String, SymbolNumber>,
    arcs: Vec<Vec<ArcPlaceholder>>,
    final_weights: Vec<Option<Weight>>,
    weighted: bool,
}

impl TransducerBuilder {
    /// A builder with the start state (id 0) and the epsilon symbol.
    pub fn new(weighted: bool) -> Self {
        let mut builder = Self {
            symbols: Vec::new(),
            symbol_numbers: HashMap::new(),
            arcs: vec![Vec::new()],
            final_weights: vec![None],
            weighted,
        };
        builder.add_symbol(EPSILON_STRING);
        builder
    }

    /// Intern a symbol string, returning its number.
    pub fn add_symbol(&mut self, symbol: &str) -> SymbolNumber {
        if let Some(&number) = self.symbol_numbers.get(symbol) {
            return number;
        }
        let number = self.symbols.len() as SymbolNumber;
        self.symbols.push(symbol.to_string());
        self.symbol_numbers.insert(symbol.to_string(), number);
        number
    }

    pub fn add_state(&mut self) -> u32 {
        self.arcs.push(Vec::new());
        self.final_weights.push(None);
        self.arcs.len() as u32 - 1
    }

    pub fn set_final(&mut self, state: u32, weight: Weight) {
        self.final_weights[state as usize] = Some(weight);
    }

    /// Add an arc; input and output are symbol strings, interned on the fly.
    pub fn add_arc(&mut self, from: u32, input: &str, output: &str, target: u32, weight: Weight) {
        let input = self.add_symbol(input);
        let output = self.add_symbol(output);
        self.arcs[from as usize].push(ArcPlaceholder {
            input,
            output,
            target,
            weight,
        });
    }

    /// Convenience: a fresh chain of arcs from `from`, returning the state
    /// at its end.
    pub fn add_path(&mut self, from: u32, pairs: &[(&str, &str)], weight: Weight) -> u32 {
        let mut state = from;
        for (i, (input, output)) in pairs.iter().enumerate() {
            let next = self.add_state();
            let w = if i == 0 { weight } else { 0.0 };
            self.add_arc(state, input, output, next, w);
            state = next;
        }
        state
    }

    /// Pack the graph into the two-table layout.
    pub fn build(self) -> Result<Transducer, OlError> {
        for (state, arcs) in self.arcs.iter().enumerate() {
            for arc in arcs {
                if arc.target as usize >= self.arcs.len() {
                    return Err(OlError::FatalInternal(format!(
                        "state {state} has an arc to nonexistent state {}",
                        arc.target
                    )));
                }
            }
        }

        let flag_symbols: HashSet<SymbolNumber> = self
            .symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| parse_flag_string(s).is_some())
            .map(|(i, _)| i as SymbolNumber)
            .collect();

        // Largest input symbol decides the reach of an index row.
        let max_input = self
            .arcs
            .iter()
            .flatten()
            .map(|arc| arc.input)
            .max()
            .unwrap_or(0);
        let input_symbol_count = max_input as usize + 1;

        let mut states: Vec<StatePlaceholder> = self
            .arcs
            .iter()
            .enumerate()
            .map(|(i, arcs)| {
                StatePlaceholder::new(i as u32, arcs, self.final_weights[i], &flag_symbols)
            })
            .collect();

        // Transition-table positions: one boundary cell per state, then its
        // run, state order; a trailing sentinel closes the last run.
        let mut position: TableIndex = 0;
        for state in &mut states {
            state.boundary = position;
            position += 1 + state.transition_count() as TableIndex;
        }
        let transition_table_size = position + 1;

        // Pack nonsimple states into the index table, densest rows first.
        let mut placeholders = IndexPlaceholders::default();
        let mut order: Vec<usize> = (0..states.len())
            .filter(|&i| !states[i].is_simple())
            .collect();
        order.sort_by_key(|&i| (usize::MAX - states[i].input_count(), i));
        let mut lower_bound = 0usize;
        for &state_index in &order {
            let keys = states[state_index].cell_keys(&flag_symbols);
            let mut base = lower_bound;
            loop {
                if !placeholders.unsuitable(base, input_symbol_count)
                    && placeholders.fits(&keys, base)
                {
                    break;
                }
                base += 1;
            }
            let state = &mut states[state_index];
            state.start_index = Some(base as TableIndex);
            placeholders.assign(
                base,
                match state.final_weight {
                    Some(weight) => TransitionIndex::final_cell(weight, self.weighted),
                    None => TransitionIndex::EMPTY,
                },
            );
            for &key in &keys {
                let offset = state.symbol_offset(key, &flag_symbols)?;
                placeholders.assign(
                    base + 1 + key as usize,
                    TransitionIndex {
                        input: key,
                        target: TRANSITION_TARGET_TABLE_START + state.boundary + 1 + offset,
                    },
                );
            }
            while placeholders.used(lower_bound) {
                lower_bound += 1;
            }
        }

        // A row probe may reach one full row past the last assigned cell.
        let index_table_size = placeholders.cells.len() + input_symbol_count + 1;
        let mut index_table = placeholders.cells;
        index_table.resize(index_table_size, TransitionIndex::EMPTY);

        // Emit the transition table with targets resolved to table positions.
        let resolve = |target: u32| -> Result<TableIndex, OlError> {
            let state = &states[target as usize];
            match state.start_index {
                Some(base) => Ok(base),
                None if state.is_simple() => Ok(TRANSITION_TARGET_TABLE_START + state.boundary),
                None => Err(OlError::FatalInternal(format!(
                    "state {target} was never placed in the index table"
                ))),
            }
        };
        let mut transition_table: Vec<Transition> =
            Vec::with_capacity(transition_table_size as usize);
        for state in &states {
            transition_table.push(Transition::boundary(
                state.final_weight.is_some(),
                state.final_weight.unwrap_or(0.0),
            ));
            for (_, group) in &state.groups {
                for arc in group {
                    transition_table.push(Transition {
                        input: arc.input,
                        output: arc.output,
                        target: resolve(arc.target)?,
                        weight: if self.weighted { arc.weight } else { 0.0 },
                    });
                }
            }
        }
        transition_table.push(Transition::boundary(false, 0.0));

        let transition_count = self.arcs.iter().map(Vec::len).sum::<usize>() as u32;
        let header = TransducerHeader {
            input_symbol_count: input_symbol_count as SymbolNumber,
            symbol_count: self.symbols.len() as SymbolNumber,
            index_table_size: index_table.len() as TableIndex,
            transition_table_size,
            state_count: self.arcs.len() as u32,
            transition_count,
            weighted: self.weighted,
            deterministic: self.is_deterministic(),
            input_deterministic: self.is_input_deterministic(&flag_symbols),
            minimized: false,
            cyclic: self.has_cycle(|_| true),
            has_epsilon_epsilon_transitions: self
                .arcs
                .iter()
                .flatten()
                .any(|arc| arc.input == 0 && arc.output == 0),
            has_input_epsilon_transitions: self
                .arcs
                .iter()
                .flatten()
                .any(|arc| arc.input == 0 || flag_symbols.contains(&arc.input)),
            has_input_epsilon_cycles: self
                .has_cycle(|arc| arc.input == 0 || flag_symbols.contains(&arc.input)),
            has_unweighted_input_epsilon_cycles: self
                .has_cycle(|arc| (arc.input == 0 || flag_symbols.contains(&arc.input)) && arc.weight == 0.0),
        };

        let alphabet = TransducerAlphabet::from_symbols(self.symbols.clone())?;
        let tables = TransducerTables::new(index_table, transition_table, self.weighted);
        Transducer::from_parts(header, alphabet, tables)
    }

    fn is_input_deterministic(&self, flag_symbols: &HashSet<SymbolNumber>) -> bool {
        self.arcs.iter().all(|arcs| {
            let mut seen = HashSet::new();
            arcs.iter().all(|arc| {
                arc.input != 0 && !flag_symbols.contains(&arc.input) && seen.insert(arc.input)
            })
        })
    }

    fn is_deterministic(&self) -> bool {
        self.arcs.iter().all(|arcs| {
            let mut seen = HashSet::new();
            arcs.iter()
                .all(|arc| arc.input != 0 && seen.insert((arc.input, arc.output)))
        })
    }

    /// Cycle detection over the arcs admitted by `admit`.
    fn has_cycle(&self, admit: impl Fn(&ArcPlaceholder) -> bool) -> bool {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let mut color = vec![WHITE; self.arcs.len()];
        // Iterative DFS; (state, next-arc) frames.
        for start in 0..self.arcs.len() {
            if color[start] != WHITE {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = GRAY;
            while let Some((state, arc_pos)) = stack.pop() {
                let arcs = &self.arcs[state];
                let mut advanced = false;
                for (i, arc) in arcs.iter().enumerate().skip(arc_pos) {
                    if !admit(arc) {
                        continue;
                    }
                    let target = arc.target as usize;
                    match color[target] {
                        GRAY => return true,
                        WHITE => {
                            stack.push((state, i + 1));
                            color[target] = GRAY;
                            stack.push((target, 0));
                            advanced = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !advanced {
                    color[state] = BLACK;
                }
            }
        }
        false
    }
}
