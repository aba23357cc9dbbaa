// One member of the pattern network: packed tables plus a name.
//
// The tables follow the shared two-table layout; symbol classification
// lives in the container's alphabet, so a network member carries no
// alphabet of its own.

use louhi_fst::tables::{Transition, TransducerTables};
use louhi_fst::transducer::Transducer;
use louhi_fst::{SymbolNumber, TableIndex, Weight, indexes_transition_table};

#[derive(Debug, Clone)]
pub struct PmatchTransducer {
    name: String,
    tables: TransducerTables,
}

impl PmatchTransducer {
    /// Adopt the tables of a compiled transducer. The caller is responsible
    /// for having checked that its alphabet agrees with the container's.
    pub fn from_transducer(t: &Transducer, name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: t.tables().clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &TransducerTables {
        &self.tables
    }

    pub fn is_final(&self, i: TableIndex) -> bool {
        self.tables.is_final(i)
    }

    pub fn final_weight(&self, i: TableIndex) -> Weight {
        self.tables.final_weight(i)
    }

    /// The transition at a biased cursor position.
    pub fn transition(&self, cursor: TableIndex) -> &Transition {
        self.tables.transition(cursor)
    }

    /// Cursor to the transition group for `symbol` out of the state at `i`.
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
}
