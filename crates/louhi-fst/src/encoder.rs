// Input tokenizer: maps a byte stream to symbol numbers, longest match first.

use crate::alphabet::TransducerAlphabet;
use crate::{NO_SYMBOL, SymbolNumber};

/// Bytes eligible for the single-byte fast path.
#[inline]
fn should_ascii_tokenize(c: u8) -> bool {
    (0x20..0x7f).contains(&c)
}

/// A trie keyed on raw bytes. Each node maps a byte to a child node and,
/// independently, to the symbol whose encoding ends at that byte.
#[derive(Debug, Clone, Default)]
struct LetterTrie {
    letters: Vec<Option<Box<LetterTrie>>>,
    symbols: Vec<SymbolNumber>,
}

impl LetterTrie {
    fn new() -> Self {
        Self {
            letters: (0..256).map(|_| None).collect(),
            symbols: vec![NO_SYMBOL; 256],
        }
    }

    fn add_string(&mut self, key: &[u8], symbol: SymbolNumber) {
        let first = key[0] as usize;
        if key.len() == 1 {
            self.symbols[first] = symbol;
            return;
        }
        self.letters[first]
            .get_or_insert_with(|| Box::new(LetterTrie::new()))
            .add_string(&key[1..], symbol);
    }

    fn has_continuation(&self, first: u8) -> bool {
        self.letters[first as usize].is_some()
    }

    /// Longest-match search. On a hit the cursor is advanced past the
    /// matched bytes; on a miss it is left untouched.
    fn find_key(&self, cursor: &mut &[u8]) -> SymbolNumber {
        let Some(&first) = cursor.first() else {
            return NO_SYMBOL;
        };
        if let Some(child) = &self.letters[first as usize] {
            let mut rest = &cursor[1..];
            let symbol = child.find_key(&mut rest);
            if symbol != NO_SYMBOL {
                *cursor = rest;
                return symbol;
            }
        }
        let symbol = self.symbols[first as usize];
        if symbol != NO_SYMBOL {
            *cursor = &cursor[1..];
        }
        symbol
    }
}

/// Tokenizer for one transducer's input alphabet.
///
/// Single-byte printable symbols are resolved through `ascii_symbols`
/// directly; everything else (UTF-8 sequences, multi-character symbols)
/// goes through the trie. A fast-path entry is revoked as soon as a longer
/// symbol starting with the same byte exists, so the trie's longest-match
/// rule always wins. Because symbols are whole UTF-8 strings, a match can
/// never end inside a codepoint.
#[derive(Debug, Clone)]
pub struct Encoder {
    ascii_symbols: Vec<SymbolNumber>,
    letters: LetterTrie,
}

impl Encoder {
    /// Index the first `input_symbol_count` symbols of the alphabet.
    /// Epsilon and flag diacritics never match input text and are skipped.
    pub fn new(alphabet: &TransducerAlphabet, input_symbol_count: SymbolNumber) -> Self {
        let mut encoder = Self {
            ascii_symbols: vec![NO_SYMBOL; 128],
            letters: LetterTrie::new(),
        };
        let count = (input_symbol_count as usize).min(alphabet.symbol_table().len());
        for number in 1..count as SymbolNumber {
            if alphabet.is_flag_diacritic(number) {
                continue;
            }
            encoder.add_symbol(alphabet.symbol_table()[number as usize].as_str(), number);
        }
        encoder
    }

    fn add_symbol(&mut self, symbol: &str, number: SymbolNumber) {
        let bytes = symbol.as_bytes();
        if bytes.is_empty() {
            return;
        }
        if bytes.len() == 1
            && should_ascii_tokenize(bytes[0])
            && !self.letters.has_continuation(bytes[0])
        {
            self.ascii_symbols[bytes[0] as usize] = number;
        } else if (bytes[0] as usize) < 128 {
            // A longer symbol shadows the fast path for its first byte.
            self.ascii_symbols[bytes[0] as usize] = NO_SYMBOL;
        }
        self.letters.add_string(bytes, number);
    }

    /// Consume the longest symbol at the cursor and return its number.
    /// `None` leaves the cursor in place.
    pub fn find_key(&self, cursor: &mut &[u8]) -> Option<SymbolNumber> {
        let &first = cursor.first()?;
        if (first as usize) < 128 && self.ascii_symbols[first as usize] != NO_SYMBOL {
            let symbol = self.ascii_symbols[first as usize];
            *cursor = &cursor[1..];
            return Some(symbol);
        }
        match self.letters.find_key(cursor) {
            NO_SYMBOL => None,
            symbol => Some(symbol),
        }
    }
}
