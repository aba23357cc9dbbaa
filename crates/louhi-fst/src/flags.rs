// Flag diacritic operations: P, N, R, D, C, U.
//
// A flag diacritic constrains traversal through a per-query feature state
// instead of consuming input. Feature values are interned to small integers;
// the state stores a signed value per feature where a negative entry means
// "set to anything but |v|" (the N operation) and 0 means unset.

use crate::{OlError, SymbolNumber};
use hashbrown::HashMap;

/// The six flag diacritic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    /// Positive set: f := v.
    P,
    /// Negative set: f := ¬v.
    N,
    /// Require: f = v; bare form requires f to be set at all.
    R,
    /// Disallow: f ≠ v; bare form requires f to be unset.
    D,
    /// Clear: unset f.
    C,
    /// Unification: set if unset, otherwise require equality.
    U,
}

/// Value id meaning "no value given" (the bare `@X.FEATURE@` form).
pub const NO_VALUE: i16 = 0;

/// A parsed flag diacritic: operator plus interned feature and value ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdOperation {
    pub op: FlagOp,
    pub feature: u16,
    pub value: i16,
}

/// Per-query flag diacritic state: one signed value id per feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FdState {
    values: Vec<i16>,
}

impl FdState {
    pub fn new(feature_count: u16) -> Self {
        Self {
            values: vec![NO_VALUE; feature_count as usize],
        }
    }

    /// Unset every feature.
    pub fn reset(&mut self) {
        for v in &mut self.values {
            *v = NO_VALUE;
        }
    }

    /// The raw per-feature values; used as part of epsilon-visit keys.
    pub fn values(&self) -> &[i16] {
        &self.values
    }

    /// Current value of a single feature (for save/restore around recursion).
    pub fn get(&self, feature: u16) -> i16 {
        self.values[feature as usize]
    }

    pub fn set(&mut self, feature: u16, value: i16) {
        self.values[feature as usize] = value;
    }

    /// Apply `op`, mutating the state. Returns `false` (state unchanged) if
    /// the operator's precondition does not hold.
    pub fn apply(&mut self, op: &FdOperation) -> bool {
        let current = self.values[op.feature as usize];
        match op.op {
            FlagOp::P => {
                self.values[op.feature as usize] = op.value;
                true
            }
            FlagOp::N => {
                self.values[op.feature as usize] = -op.value;
                true
            }
            FlagOp::R => {
                if op.value == NO_VALUE {
                    current != NO_VALUE
                } else {
                    current == op.value
                }
            }
            FlagOp::D => {
                if op.value == NO_VALUE {
                    current == NO_VALUE
                } else {
                    current != op.value
                }
            }
            FlagOp::C => {
                self.values[op.feature as usize] = NO_VALUE;
                true
            }
            FlagOp::U => {
                if current == NO_VALUE || current == op.value {
                    self.values[op.feature as usize] = op.value;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Split a flag diacritic string `@X.FEATURE@` / `@X.FEATURE.VALUE@` into its
/// parts. Returns `None` for anything else, including other `@…@` symbols.
pub fn parse_flag_string(symbol: &str) -> Option<(FlagOp, &str, &str)> {
    let bytes = symbol.as_bytes();
    if bytes.len() < 5 || bytes[0] != b'@' || bytes[bytes.len() - 1] != b'@' || bytes[2] != b'.' {
        return None;
    }
    let op = match bytes[1] {
        b'P' => FlagOp::P,
        b'N' => FlagOp::N,
        b'R' => FlagOp::R,
        b'D' => FlagOp::D,
        b'C' => FlagOp::C,
        b'U' => FlagOp::U,
        _ => return None,
    };
    let inner = &symbol[3..symbol.len() - 1];
    if inner.is_empty() {
        return None;
    }
    match inner.find('.') {
        Some(dot) => {
            let (feature, value) = (&inner[..dot], &inner[dot + 1..]);
            if feature.is_empty() || value.is_empty() {
                None
            } else {
                Some((op, feature, value))
            }
        }
        None => Some((op, inner, "")),
    }
}

/// Interning table for flag diacritics over one alphabet: feature and value
/// names get small ids, and each flag symbol number maps to its parsed
/// operation.
#[derive(Debug, Clone, Default)]
pub struct FdTable {
    features: HashMap<String, u16>,
    values: HashMap<String, i16>,
    operations: HashMap<SymbolNumber, FdOperation>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature_count(&self) -> u16 {
        self.features.len() as u16
    }

    pub fn is_diacritic(&self, symbol: SymbolNumber) -> bool {
        self.operations.contains_key(&symbol)
    }

    pub fn get_operation(&self, symbol: SymbolNumber) -> Option<&FdOperation> {
        self.operations.get(&symbol)
    }

    /// A fresh all-unset state sized for this table.
    pub fn start_state(&self) -> FdState {
        FdState::new(self.feature_count())
    }

    /// Register `symbol_string` as symbol number `symbol` if it parses as a
    /// flag diacritic; otherwise do nothing. Returns whether it was a flag.
    pub fn add_symbol(&mut self, symbol: SymbolNumber, symbol_string: &str) -> Result<bool, OlError> {
        let Some((op, feature_str, value_str)) = parse_flag_string(symbol_string) else {
            return Ok(false);
        };

        let next_feature = self.features.len() as u16;
        let feature = *self
            .features
            .entry(feature_str.to_string())
            .or_insert(next_feature);

        let value = if value_str.is_empty() {
            NO_VALUE
        } else {
            let next_value = self.values.len() as i16 + 1;
            if next_value == i16::MAX {
                return Err(OlError::BadTransducer(
                    "too many distinct flag diacritic values".to_string(),
                ));
            }
            *self.values.entry(value_str.to_string()).or_insert(next_value)
        };

        self.operations
            .insert(symbol, FdOperation { op, feature, value });
        Ok(true)
    }
}
