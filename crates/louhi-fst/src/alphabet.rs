// Symbol table and distinguished symbols.

use crate::flags::FdTable;
use crate::{NO_SYMBOL, OlError, SymbolNumber};
use hashbrown::HashMap;

pub const EPSILON_STRING: &str = "@_EPSILON_SYMBOL_@";
pub const UNKNOWN_STRING: &str = "@_UNKNOWN_SYMBOL_@";
pub const IDENTITY_STRING: &str = "@_IDENTITY_SYMBOL_@";
pub const DEFAULT_STRING: &str = "@_DEFAULT_SYMBOL_@";

/// The ordered symbol table of a transducer, plus the flag diacritic table
/// and the numbers of the distinguished unknown / identity / default
/// symbols, if present.
///
/// The alphabet is value-copied into derived runtimes that extend it with
/// auxiliary symbols; `orig_symbol_count` marks where the loaded symbols end.
#[derive(Debug, Clone)]
pub struct TransducerAlphabet {
    symbol_table: Vec<String>,
    fd_table: FdTable,
    unknown_symbol: Option<SymbolNumber>,
    identity_symbol: Option<SymbolNumber>,
    default_symbol: Option<SymbolNumber>,
    orig_symbol_count: SymbolNumber,
}

impl TransducerAlphabet {
    /// Parse `symbol_count` NUL-terminated symbol strings from `data`
    /// starting at `offset`. Returns the alphabet and the offset just past
    /// the last terminator.
    pub fn from_bytes(
        data: &[u8],
        offset: usize,
        symbol_count: SymbolNumber,
    ) -> Result<(Self, usize), OlError> {
        let mut symbols = Vec::with_capacity(symbol_count as usize);
        let mut pos = offset;
        for i in 0..symbol_count {
            let start = pos;
            while pos < data.len() && data[pos] != 0 {
                pos += 1;
            }
            if pos >= data.len() {
                return Err(OlError::BadTransducer(format!(
                    "unterminated string for symbol {i}"
                )));
            }
            let s = std::str::from_utf8(&data[start..pos])
                .map_err(|_| OlError::BadTransducer(format!("symbol {i} is not valid UTF-8")))?;
            symbols.push(s.to_string());
            pos += 1;
        }
        Ok((Self::from_symbols(symbols)?, pos))
    }

    /// Build an alphabet from an ordered symbol list. Symbol 0 is epsilon.
    pub fn from_symbols(symbol_table: Vec<String>) -> Result<Self, OlError> {
        if symbol_table.is_empty() {
            return Err(OlError::BadTransducer("empty symbol table".to_string()));
        }
        let mut alphabet = Self {
            symbol_table: Vec::new(),
            fd_table: FdTable::new(),
            unknown_symbol: None,
            identity_symbol: None,
            default_symbol: None,
            orig_symbol_count: 0,
        };
        for symbol in symbol_table {
            alphabet.add_symbol(&symbol)?;
        }
        alphabet.orig_symbol_count = alphabet.symbol_table.len() as SymbolNumber;
        Ok(alphabet)
    }

    /// Append one symbol, classifying it as flag diacritic or distinguished
    /// symbol as a side effect. Returns its number.
    pub fn add_symbol(&mut self, symbol: &str) -> Result<SymbolNumber, OlError> {
        let number = self.symbol_table.len();
        if number > NO_SYMBOL as usize {
            return Err(OlError::BadTransducer("symbol table overflow".to_string()));
        }
        let number = number as SymbolNumber;
        self.fd_table.add_symbol(number, symbol)?;
        match symbol {
            UNKNOWN_STRING => self.unknown_symbol = Some(number),
            IDENTITY_STRING => self.identity_symbol = Some(number),
            DEFAULT_STRING => self.default_symbol = Some(number),
            _ => {}
        }
        self.symbol_table.push(symbol.to_string());
        Ok(number)
    }

    /// Append the wire form: each symbol NUL-terminated, in symbol order.
    pub fn write(&self, out: &mut Vec<u8>) {
        for symbol in &self.symbol_table {
            out.extend_from_slice(symbol.as_bytes());
            out.push(0);
        }
    }

    pub fn symbol_count(&self) -> SymbolNumber {
        self.symbol_table.len() as SymbolNumber
    }

    pub fn orig_symbol_count(&self) -> SymbolNumber {
        self.orig_symbol_count
    }

    pub fn symbol_table(&self) -> &[String] {
        &self.symbol_table
    }

    /// The symbol's stored string; epsilon prints as the empty string.
    pub fn string_from_symbol(&self, symbol: SymbolNumber) -> &str {
        if symbol == 0 {
            return "";
        }
        &self.symbol_table[symbol as usize]
    }

    /// The symbol's printable form: meta symbols (`@…@`) are elided.
    pub fn print_symbol(&self, symbol: SymbolNumber) -> &str {
        let s = self.string_from_symbol(symbol);
        if is_meta_symbol(s) { "" } else { s }
    }

    /// Linear scan; for repeated queries use [`build_string_symbol_map`].
    ///
    /// [`build_string_symbol_map`]: Self::build_string_symbol_map
    pub fn symbol_from_string(&self, symbol_string: &str) -> Option<SymbolNumber> {
        self.symbol_table
            .iter()
            .position(|s| s == symbol_string)
            .map(|i| i as SymbolNumber)
    }

    pub fn build_string_symbol_map(&self) -> HashMap<String, SymbolNumber> {
        let mut map = HashMap::with_capacity(self.symbol_table.len());
        for (i, s) in self.symbol_table.iter().enumerate() {
            map.entry(s.clone()).or_insert(i as SymbolNumber);
        }
        map
    }

    pub fn fd_table(&self) -> &FdTable {
        &self.fd_table
    }

    pub fn has_flag_diacritics(&self) -> bool {
        self.fd_table.feature_count() > 0
    }

    pub fn is_flag_diacritic(&self, symbol: SymbolNumber) -> bool {
        self.fd_table.is_diacritic(symbol)
    }

    /// Epsilon and flag diacritics traverse without consuming input.
    pub fn is_like_epsilon(&self, symbol: SymbolNumber) -> bool {
        symbol == 0 || self.is_flag_diacritic(symbol)
    }

    pub fn unknown_symbol(&self) -> Option<SymbolNumber> {
        self.unknown_symbol
    }

    pub fn identity_symbol(&self) -> Option<SymbolNumber> {
        self.identity_symbol
    }

    pub fn default_symbol(&self) -> Option<SymbolNumber> {
        self.default_symbol
    }
}

/// Meta symbols are drawn `@…@` and never reach printed output.
pub fn is_meta_symbol(s: &str) -> bool {
    s.len() > 2 && s.starts_with('@') && s.ends_with('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransducerAlphabet {
        TransducerAlphabet::from_symbols(vec![
            EPSILON_STRING.to_string(),
            "@P.CASE.NOM@".to_string(),
            UNKNOWN_STRING.to_string(),
            IDENTITY_STRING.to_string(),
            "a".to_string(),
            "tulla".to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn distinguished_symbols_are_found() {
        let alphabet = sample();
        assert_eq!(alphabet.unknown_symbol(), Some(2));
        assert_eq!(alphabet.identity_symbol(), Some(3));
        assert_eq!(alphabet.default_symbol(), None);
        assert_eq!(alphabet.orig_symbol_count(), 6);
    }

    #[test]
    fn flags_are_classified() {
        let alphabet = sample();
        assert!(alphabet.is_flag_diacritic(1));
        assert!(!alphabet.is_flag_diacritic(4));
        assert!(alphabet.is_like_epsilon(0));
        assert!(alphabet.is_like_epsilon(1));
        assert!(!alphabet.is_like_epsilon(4));
    }

    #[test]
    fn meta_symbols_print_as_empty() {
        let alphabet = sample();
        assert_eq!(alphabet.print_symbol(0), "");
        assert_eq!(alphabet.print_symbol(1), "");
        assert_eq!(alphabet.print_symbol(2), "");
        assert_eq!(alphabet.print_symbol(4), "a");
        assert_eq!(alphabet.print_symbol(5), "tulla");
    }

    #[test]
    fn binary_round_trip() {
        let alphabet = sample();
        let mut buf = Vec::new();
        alphabet.write(&mut buf);

        let (parsed, end) =
            TransducerAlphabet::from_bytes(&buf, 0, alphabet.symbol_count()).unwrap();
        assert_eq!(parsed.symbol_table(), alphabet.symbol_table());
        assert_eq!(end, buf.len());
        assert_eq!(parsed.unknown_symbol(), alphabet.unknown_symbol());
    }

    #[test]
    fn reject_unterminated_symbol() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"\0a");
        assert!(matches!(
            TransducerAlphabet::from_bytes(&buf, 0, 2),
            Err(OlError::BadTransducer(_))
        ));
    }

    #[test]
    fn symbol_lookup_by_string() {
        let alphabet = sample();
        assert_eq!(alphabet.symbol_from_string("tulla"), Some(5));
        assert_eq!(alphabet.symbol_from_string("nothere"), None);
        let map = alphabet.build_string_symbol_map();
        assert_eq!(map.get("a"), Some(&4));
    }

    #[test]
    fn added_symbols_extend_past_original_count() {
        let mut alphabet = sample();
        let n = alphabet.add_symbol("aux").unwrap();
        assert_eq!(n, 6);
        assert_eq!(alphabet.orig_symbol_count(), 6);
        assert_eq!(alphabet.symbol_count(), 7);
    }
}
