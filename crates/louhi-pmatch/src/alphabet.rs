// The container's extended alphabet: the base symbol table plus the
// classification of every auxiliary symbol the interpreter reacts to.

use hashbrown::{HashMap, HashSet};
use louhi_fst::alphabet::TransducerAlphabet;
use louhi_fst::flags::parse_flag_string;
use louhi_fst::{OlError, SymbolNumber};

/// The reserved special symbols, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialSymbol {
    Entry,
    Exit,
    LcEntry,
    LcExit,
    RcEntry,
    RcExit,
    NlcEntry,
    NlcExit,
    NrcEntry,
    NrcExit,
    Passthrough,
    Boundary,
    InputMark,
}

impl SpecialSymbol {
    pub const ALL: [SpecialSymbol; 13] = [
        SpecialSymbol::Entry,
        SpecialSymbol::Exit,
        SpecialSymbol::LcEntry,
        SpecialSymbol::LcExit,
        SpecialSymbol::RcEntry,
        SpecialSymbol::RcExit,
        SpecialSymbol::NlcEntry,
        SpecialSymbol::NlcExit,
        SpecialSymbol::NrcEntry,
        SpecialSymbol::NrcExit,
        SpecialSymbol::Passthrough,
        SpecialSymbol::Boundary,
        SpecialSymbol::InputMark,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpecialSymbol::Entry => "@PMATCH_ENTRY@",
            SpecialSymbol::Exit => "@PMATCH_EXIT@",
            SpecialSymbol::LcEntry => "@PMATCH_LC_ENTRY@",
            SpecialSymbol::LcExit => "@PMATCH_LC_EXIT@",
            SpecialSymbol::RcEntry => "@PMATCH_RC_ENTRY@",
            SpecialSymbol::RcExit => "@PMATCH_RC_EXIT@",
            SpecialSymbol::NlcEntry => "@PMATCH_NLC_ENTRY@",
            SpecialSymbol::NlcExit => "@PMATCH_NLC_EXIT@",
            SpecialSymbol::NrcEntry => "@PMATCH_NRC_ENTRY@",
            SpecialSymbol::NrcExit => "@PMATCH_NRC_EXIT@",
            SpecialSymbol::Passthrough => "@PMATCH_PASSTHROUGH@",
            SpecialSymbol::Boundary => "@BOUNDARY@",
            SpecialSymbol::InputMark => "@PMATCH_INPUT_MARK@",
        }
    }

    fn from_str(s: &str) -> Option<SpecialSymbol> {
        SpecialSymbol::ALL.iter().copied().find(|x| x.as_str() == s)
    }
}

/// An inclusive or exclusionary symbol list; a transition carrying the list
/// symbol matches any input symbol admitted by it.
#[derive(Debug, Clone)]
pub struct SymbolList {
    pub exclusionary: bool,
    member_names: Vec<String>,
    members: HashSet<SymbolNumber>,
}

impl SymbolList {
    pub fn admits(&self, symbol: SymbolNumber) -> bool {
        self.members.contains(&symbol) != self.exclusionary
    }
}

/// The shared alphabet of a pattern container. Wraps a value-copied base
/// alphabet (flag diacritics included) and classifies every auxiliary
/// symbol: the reserved specials, subtransducer insertions, end tags,
/// captures, counters, guards, lists, and global flags.
#[derive(Debug, Clone)]
pub struct PmatchAlphabet {
    base: TransducerAlphabet,
    special_numbers: HashMap<SpecialSymbol, SymbolNumber>,
    specials: HashMap<SymbolNumber, SpecialSymbol>,
    rtn_symbols: HashMap<String, SymbolNumber>,
    rtn_names: HashMap<SymbolNumber, String>,
    end_tags: HashMap<SymbolNumber, String>,
    captures: HashMap<SymbolNumber, String>,
    captureds: HashMap<SymbolNumber, String>,
    counters: HashMap<SymbolNumber, String>,
    guards: HashMap<SymbolNumber, String>,
    lists: HashMap<SymbolNumber, SymbolList>,
    global_flags: HashSet<SymbolNumber>,
    /// Symbols the interpreter probes during the no-input phase, ascending.
    epsilon_like: Vec<SymbolNumber>,
}

fn tag_name<'a>(symbol: &'a str, prefix: &str) -> Option<&'a str> {
    symbol
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix('@'))
        .filter(|name| !name.is_empty())
}

impl PmatchAlphabet {
    /// Extend a copy of `base` into a pattern alphabet. The reserved
    /// special symbols are appended when the compiled alphabet lacks them.
    pub fn new(base: &TransducerAlphabet) -> Result<Self, OlError> {
        let mut alphabet = Self {
            base: base.clone(),
            special_numbers: HashMap::new(),
            specials: HashMap::new(),
            rtn_symbols: HashMap::new(),
            rtn_names: HashMap::new(),
            end_tags: HashMap::new(),
            captures: HashMap::new(),
            captureds: HashMap::new(),
            counters: HashMap::new(),
            guards: HashMap::new(),
            lists: HashMap::new(),
            global_flags: HashSet::new(),
            epsilon_like: Vec::new(),
        };
        for number in 0..alphabet.base.symbol_count() {
            alphabet.classify(number);
        }
        for special in SpecialSymbol::ALL {
            if !alphabet.special_numbers.contains_key(&special) {
                let number = alphabet.base.add_symbol(special.as_str())?;
                alphabet.classify(number);
            }
        }
        alphabet.resolve_lists();
        Ok(alphabet)
    }

    /// Append a symbol (harmonizing a network member's surplus symbols).
    pub fn add_symbol(&mut self, symbol: &str) -> Result<SymbolNumber, OlError> {
        let number = self.base.add_symbol(symbol)?;
        self.classify(number);
        self.resolve_lists();
        Ok(number)
    }

    fn classify(&mut self, number: SymbolNumber) {
        let symbol = self.base.string_from_symbol(number).to_string();
        if let Some(special) = SpecialSymbol::from_str(&symbol) {
            self.special_numbers.entry(special).or_insert(number);
            self.specials.insert(number, special);
        } else if let Some(name) = tag_name(&symbol, "@I.") {
            self.rtn_symbols.insert(name.to_string(), number);
            self.rtn_names.insert(number, name.to_string());
        } else if let Some(name) = tag_name(&symbol, "@PMATCH_ENDTAG_") {
            self.end_tags.insert(number, name.to_string());
        } else if let Some(name) = tag_name(&symbol, "@PMATCH_CAPTURED_") {
            self.captureds.insert(number, name.to_string());
        } else if let Some(name) = tag_name(&symbol, "@PMATCH_CAPTURE_") {
            self.captures.insert(number, name.to_string());
        } else if let Some(name) = tag_name(&symbol, "@PMATCH_COUNTER_") {
            self.counters.insert(number, name.to_string());
        } else if let Some(name) = tag_name(&symbol, "@PMATCH_GUARD_") {
            self.guards.insert(number, name.to_string());
        } else if let Some(members) = tag_name(&symbol, "@PMATCH_LIST_") {
            self.lists.insert(
                number,
                SymbolList {
                    exclusionary: false,
                    member_names: members.split('.').map(str::to_string).collect(),
                    members: HashSet::new(),
                },
            );
        } else if let Some(members) = tag_name(&symbol, "@PMATCH_XLIST_") {
            self.lists.insert(
                number,
                SymbolList {
                    exclusionary: true,
                    member_names: members.split('.').map(str::to_string).collect(),
                    members: HashSet::new(),
                },
            );
        } else if let Some((_, feature, _)) = parse_flag_string(&symbol)
            && feature.starts_with("G_")
        {
            self.global_flags.insert(number);
        }
        self.rebuild_epsilon_like();
    }

    /// List members may be declared before the member symbols themselves.
    fn resolve_lists(&mut self) {
        let resolve: HashMap<&String, SymbolNumber> = self
            .base
            .symbol_table()
            .iter()
            .enumerate()
            .map(|(i, s)| (s, i as SymbolNumber))
            .collect();
        for list in self.lists.values_mut() {
            list.members = list
                .member_names
                .iter()
                .filter_map(|name| resolve.get(name).copied())
                .collect();
        }
    }

    fn rebuild_epsilon_like(&mut self) {
        let mut symbols: Vec<SymbolNumber> = self
            .specials
            .iter()
            .filter(|(_, s)| !matches!(s, SpecialSymbol::Boundary))
            .map(|(n, _)| *n)
            .chain(self.rtn_names.keys().copied())
            .chain(self.end_tags.keys().copied())
            .chain(self.captures.keys().copied())
            .chain(self.captureds.keys().copied())
            .chain(self.counters.keys().copied())
            .chain(self.guards.keys().copied())
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        self.epsilon_like = symbols;
    }

    pub fn base(&self) -> &TransducerAlphabet {
        &self.base
    }

    pub fn special(&self, number: SymbolNumber) -> Option<SpecialSymbol> {
        self.specials.get(&number).copied()
    }

    pub fn special_number(&self, special: SpecialSymbol) -> Option<SymbolNumber> {
        self.special_numbers.get(&special).copied()
    }

    pub fn rtn_symbol(&self, name: &str) -> Option<SymbolNumber> {
        self.rtn_symbols.get(name).copied()
    }

    pub fn rtn_name(&self, number: SymbolNumber) -> Option<&str> {
        self.rtn_names.get(&number).map(String::as_str)
    }

    pub fn rtn_names(&self) -> impl Iterator<Item = (&str, SymbolNumber)> {
        self.rtn_symbols.iter().map(|(name, n)| (name.as_str(), *n))
    }

    pub fn end_tag(&self, number: SymbolNumber) -> Option<&str> {
        self.end_tags.get(&number).map(String::as_str)
    }

    pub fn capture_name(&self, number: SymbolNumber) -> Option<&str> {
        self.captures.get(&number).map(String::as_str)
    }

    pub fn captured_name(&self, number: SymbolNumber) -> Option<&str> {
        self.captureds.get(&number).map(String::as_str)
    }

    pub fn counter_name(&self, number: SymbolNumber) -> Option<&str> {
        self.counters.get(&number).map(String::as_str)
    }

    pub fn guard_name(&self, number: SymbolNumber) -> Option<&str> {
        self.guards.get(&number).map(String::as_str)
    }

    pub fn list(&self, number: SymbolNumber) -> Option<&SymbolList> {
        self.lists.get(&number)
    }

    pub fn lists(&self) -> impl Iterator<Item = (SymbolNumber, &SymbolList)> {
        self.lists.iter().map(|(n, l)| (*n, l))
    }

    pub fn is_global_flag(&self, number: SymbolNumber) -> bool {
        self.global_flags.contains(&number)
    }

    pub fn epsilon_like(&self) -> &[SymbolNumber] {
        &self.epsilon_like
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use louhi_fst::alphabet::EPSILON_STRING;

    fn base(symbols: &[&str]) -> TransducerAlphabet {
        let mut table = vec![EPSILON_STRING.to_string()];
        table.extend(symbols.iter().map(|s| s.to_string()));
        TransducerAlphabet::from_symbols(table).unwrap()
    }

    #[test]
    fn reserved_specials_are_appended() {
        let alphabet = PmatchAlphabet::new(&base(&["a"])).unwrap();
        for special in SpecialSymbol::ALL {
            assert!(alphabet.special_number(special).is_some(), "{special:?}");
        }
        // The base copy grew; the original count is preserved underneath.
        assert_eq!(alphabet.base().orig_symbol_count(), 2);
        assert!(alphabet.base().symbol_count() > 2);
    }

    #[test]
    fn auxiliary_symbols_are_classified() {
        let alphabet = PmatchAlphabet::new(&base(&[
            "a",
            "@I.Noun@",
            "@PMATCH_ENDTAG_np@",
            "@PMATCH_CAPTURE_x@",
            "@PMATCH_CAPTURED_x@",
            "@PMATCH_COUNTER_hits@",
            "@PMATCH_GUARD_main@",
        ]))
        .unwrap();

        assert_eq!(alphabet.rtn_symbol("Noun"), Some(2));
        assert_eq!(alphabet.rtn_name(2), Some("Noun"));
        assert_eq!(alphabet.end_tag(3), Some("np"));
        assert_eq!(alphabet.capture_name(4), Some("x"));
        assert_eq!(alphabet.captured_name(5), Some("x"));
        assert_eq!(alphabet.counter_name(6), Some("hits"));
        assert_eq!(alphabet.guard_name(7), Some("main"));
        // All of the above take part in the no-input phase.
        for number in 2..=7 {
            assert!(alphabet.epsilon_like().contains(&number));
        }
    }

    #[test]
    fn capture_and_captured_do_not_collide() {
        let alphabet =
            PmatchAlphabet::new(&base(&["@PMATCH_CAPTURE_a@", "@PMATCH_CAPTURED_a@"])).unwrap();
        assert_eq!(alphabet.capture_name(1), Some("a"));
        assert!(alphabet.captured_name(1).is_none());
        assert_eq!(alphabet.captured_name(2), Some("a"));
    }

    #[test]
    fn lists_resolve_members() {
        let alphabet =
            PmatchAlphabet::new(&base(&["a", "b", "c", "@PMATCH_LIST_a.b@", "@PMATCH_XLIST_c@"]))
                .unwrap();
        let list = alphabet.list(4).unwrap();
        assert!(list.admits(1));
        assert!(list.admits(2));
        assert!(!list.admits(3));

        let xlist = alphabet.list(5).unwrap();
        assert!(!xlist.admits(3));
        assert!(xlist.admits(1));
    }

    #[test]
    fn global_flags_are_separated_from_local_ones() {
        let alphabet = PmatchAlphabet::new(&base(&["@P.G_Seen.yes@", "@P.Case.nom@"])).unwrap();
        assert!(alphabet.is_global_flag(1));
        assert!(!alphabet.is_global_flag(2));
        // Both are still flag diacritics in the base table.
        assert!(alphabet.base().is_flag_diacritic(1));
        assert!(alphabet.base().is_flag_diacritic(2));
    }

    #[test]
    fn boundary_is_not_epsilon_like() {
        let alphabet = PmatchAlphabet::new(&base(&[])).unwrap();
        let boundary = alphabet.special_number(SpecialSymbol::Boundary).unwrap();
        assert!(!alphabet.epsilon_like().contains(&boundary));
        let entry = alphabet.special_number(SpecialSymbol::Entry).unwrap();
        assert!(alphabet.epsilon_like().contains(&entry));
    }
}
