// Spell correction: an error model composed on the fly with a lexicon.
//
// The agenda is breadth-first over tree nodes carrying both machines'
// states. Mutator output symbols are translated into the lexicon's
// numbering once, at construction; a symbol without a counterpart is a
// hard error because every correction the model can emit must be
// checkable against the lexicon.

use crate::flags::FdState;
use crate::transducer::Transducer;
use crate::{NO_SYMBOL, OlError, SymbolNumber, TableIndex, Weight};
use hashbrown::HashMap;
use std::collections::VecDeque;

/// Agenda nodes processed before a correction search gives up. Hitting the
/// budget truncates the candidate set, it is not an error.
const NODE_BUDGET: usize = 1 << 20;

/// One correction candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub weight: Weight,
    pub string: String,
}

/// A point in the product search: input position, both machine states, the
/// lexicon flag state, and the surface symbols committed so far.
#[derive(Debug, Clone)]
struct TreeNode {
    output: Vec<SymbolNumber>,
    input_pos: usize,
    mutator_state: TableIndex,
    lexicon_state: TableIndex,
    flag_state: FdState,
    weight: Weight,
}

impl TreeNode {
    fn start(flag_state: FdState) -> Self {
        Self {
            output: Vec::new(),
            input_pos: 0,
            mutator_state: 0,
            lexicon_state: 0,
            flag_state,
            weight: 0.0,
        }
    }
}

/// A spellchecker built from an error-model transducer and a lexicon.
#[derive(Debug)]
pub struct Speller<'a> {
    mutator: &'a Transducer,
    lexicon: &'a Transducer,
    /// Mutator symbol number to lexicon symbol number; epsilon and the
    /// mutator's flag diacritics translate to epsilon.
    translator: Vec<SymbolNumber>,
}

impl<'a> Speller<'a> {
    pub fn new(mutator: &'a Transducer, lexicon: &'a Transducer) -> Result<Self, OlError> {
        let lexicon_map = lexicon.alphabet().build_string_symbol_map();
        let mutator_symbols = mutator.alphabet().symbol_table();
        let mut translator = Vec::with_capacity(mutator_symbols.len());
        for (number, symbol) in mutator_symbols.iter().enumerate() {
            let number = number as SymbolNumber;
            if number == 0 || mutator.is_flag(number) {
                translator.push(0);
                continue;
            }
            match lexicon_map.get(symbol) {
                Some(&lexicon_number) => translator.push(lexicon_number),
                None => return Err(OlError::AlphabetTranslation(symbol.clone())),
            }
        }
        Ok(Self {
            mutator,
            lexicon,
            translator,
        })
    }

    /// Whether `word` is in the lexicon (flag diacritics honored).
    pub fn check(&self, word: &str) -> bool {
        !self.lexicon.lookup(word, 1, 0.0).is_empty()
    }

    /// Corrections of `word`, ranked by ascending combined weight. A word
    /// the error model cannot read yields no corrections.
    pub fn correct(&self, word: &str) -> Vec<Correction> {
        let Some(input) = self.tokenize_for_mutator(word) else {
            return Vec::new();
        };

        let mut queue: VecDeque<TreeNode> = VecDeque::new();
        queue.push_back(TreeNode::start(
            self.lexicon.alphabet().fd_table().start_state(),
        ));
        let mut best: HashMap<String, Weight> = HashMap::new();
        let mut processed = 0;

        while let Some(front) = queue.pop_front() {
            processed += 1;
            if processed > NODE_BUDGET {
                break;
            }
            self.lexicon_epsilons(&front, &mut queue);
            self.mutator_epsilons(&front, &mut queue);
            if front.input_pos == input.len() {
                if self.mutator.is_final(front.mutator_state)
                    && self.lexicon.is_final(front.lexicon_state)
                {
                    let weight = front.weight
                        + self.mutator.final_weight(front.mutator_state)
                        + self.lexicon.final_weight(front.lexicon_state);
                    let string = self.stringify(&front.output);
                    let entry = best.entry(string).or_insert(weight);
                    if weight < *entry {
                        *entry = weight;
                    }
                }
            } else {
                self.consume_input(&front, input[front.input_pos], &mut queue);
            }
        }

        let mut corrections: Vec<Correction> = best
            .into_iter()
            .map(|(string, weight)| Correction { weight, string })
            .collect();
        corrections.sort_by(|a, b| {
            a.weight
                .partial_cmp(&b.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.string.cmp(&b.string))
        });
        corrections
    }

    /// The error model must know every input symbol; anything else means no
    /// corrections rather than an error.
    fn tokenize_for_mutator(&self, word: &str) -> Option<Vec<SymbolNumber>> {
        let mut symbols = Vec::new();
        let mut cursor = word.as_bytes();
        while !cursor.is_empty() {
            symbols.push(self.mutator.encoder().find_key(&mut cursor)?);
        }
        Some(symbols)
    }

    fn stringify(&self, output: &[SymbolNumber]) -> String {
        let mut string = String::new();
        for &symbol in output {
            string.push_str(self.lexicon.alphabet().print_symbol(symbol));
        }
        string
    }

    /// Lexicon-side epsilon and flag transitions advance the lexicon alone.
    fn lexicon_epsilons(&self, front: &TreeNode, queue: &mut VecDeque<TreeNode>) {
        let Some(mut cursor) = self.lexicon.next_e(front.lexicon_state) else {
            return;
        };
        while let Some(step) = self.lexicon.take_epsilons_and_flags(cursor) {
            let mut node = front.clone();
            node.lexicon_state = step.index;
            node.weight += step.weight;
            let allowed = match self.lexicon.alphabet().fd_table().get_operation(step.symbol) {
                Some(op) => node.flag_state.apply(op),
                None => {
                    if step.symbol != 0 {
                        node.output.push(step.symbol);
                    }
                    true
                }
            };
            if allowed {
                queue.push_back(node);
            }
            cursor += 1;
        }
    }

    /// Mutator-side epsilon transitions emit correction symbols without
    /// consuming input; the lexicon must be able to read each one.
    fn mutator_epsilons(&self, front: &TreeNode, queue: &mut VecDeque<TreeNode>) {
        let Some(mut cursor) = self.mutator.next_e(front.mutator_state) else {
            return;
        };
        while let Some(step) = self.mutator.take_epsilons_and_flags(cursor) {
            let translated = self.translate(step.symbol);
            if translated == 0 {
                let mut node = front.clone();
                node.mutator_state = step.index;
                node.weight += step.weight;
                queue.push_back(node);
            } else {
                self.lexicon_consume(front, translated, step.index, step.weight, None, queue);
            }
            cursor += 1;
        }
    }

    /// Consume one input symbol in the mutator; its outputs feed the
    /// lexicon.
    fn consume_input(&self, front: &TreeNode, symbol: SymbolNumber, queue: &mut VecDeque<TreeNode>) {
        let Some(mut cursor) = self.mutator.next(front.mutator_state, symbol) else {
            return;
        };
        while let Some(step) = self.mutator.take_non_epsilons(cursor, symbol) {
            let translated = self.translate(step.symbol);
            if translated == 0 {
                let mut node = front.clone();
                node.mutator_state = step.index;
                node.input_pos += 1;
                node.weight += step.weight;
                queue.push_back(node);
            } else {
                self.lexicon_consume(
                    front,
                    translated,
                    step.index,
                    step.weight,
                    Some(front.input_pos + 1),
                    queue,
                );
            }
            cursor += 1;
        }
    }

    /// Feed `symbol` to the lexicon, pairing every lexicon transition with
    /// the already-chosen mutator move.
    fn lexicon_consume(
        &self,
        front: &TreeNode,
        symbol: SymbolNumber,
        mutator_target: TableIndex,
        mutator_weight: Weight,
        next_input_pos: Option<usize>,
        queue: &mut VecDeque<TreeNode>,
    ) {
        let Some(mut cursor) = self.lexicon.next(front.lexicon_state, symbol) else {
            return;
        };
        while let Some(step) = self.lexicon.take_non_epsilons(cursor, symbol) {
            let mut node = front.clone();
            node.mutator_state = mutator_target;
            node.lexicon_state = step.index;
            node.weight += mutator_weight + step.weight;
            node.output.push(symbol);
            if let Some(pos) = next_input_pos {
                node.input_pos = pos;
            }
            queue.push_back(node);
            cursor += 1;
        }
    }

    fn translate(&self, symbol: SymbolNumber) -> SymbolNumber {
        if symbol == NO_SYMBOL {
            return 0;
        }
        self.translator
            .get(symbol as usize)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::TransducerBuilder;

    /// A lexicon accepting "cat" (weight 0) and "hat" (weight 0.5).
    fn lexicon() -> Transducer {
        let mut b = TransducerBuilder::new(true);
        let cat = b.add_path(0, &[("c", "c"), ("a", "a"), ("t", "t")], 0.0);
        b.set_final(cat, 0.0);
        let hat = b.add_path(0, &[("h", "h"), ("a", "a"), ("t", "t")], 0.5);
        b.set_final(hat, 0.0);
        b.build().unwrap()
    }

    /// An error model passing every letter through at no cost and allowing
    /// c→h and h→c substitutions at cost 1.
    fn mutator() -> Transducer {
        let mut b = TransducerBuilder::new(true);
        for letter in ["c", "a", "t", "h"] {
            b.add_arc(0, letter, letter, 0, 0.0);
        }
        b.add_arc(0, "c", "h", 0, 1.0);
        b.add_arc(0, "h", "c", 0, 1.0);
        b.set_final(0, 0.0);
        b.build().unwrap()
    }

    #[test]
    fn check_consults_the_lexicon() {
        let lexicon = lexicon();
        let mutator = mutator();
        let speller = Speller::new(&mutator, &lexicon).unwrap();
        assert!(speller.check("cat"));
        assert!(speller.check("hat"));
        assert!(!speller.check("bat"));
    }

    #[test]
    fn corrections_are_ranked_by_weight() {
        let lexicon = lexicon();
        let mutator = mutator();
        let speller = Speller::new(&mutator, &lexicon).unwrap();

        let corrections = speller.correct("cat");
        // "cat" itself at 0, then "hat" via substitution (1.0 + 0.5).
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].string, "cat");
        assert_eq!(corrections[0].weight, 0.0);
        assert_eq!(corrections[1].string, "hat");
        assert_eq!(corrections[1].weight, 1.5);
    }

    #[test]
    fn unreadable_input_yields_nothing() {
        let lexicon = lexicon();
        let mutator = mutator();
        let speller = Speller::new(&mutator, &lexicon).unwrap();
        assert!(speller.correct("xyz").is_empty());
    }

    #[test]
    fn missing_counterpart_is_a_translation_error() {
        let lexicon = lexicon();
        let mut b = TransducerBuilder::new(true);
        b.add_arc(0, "q", "q", 0, 0.0);
        b.set_final(0, 0.0);
        let mutator = b.build().unwrap();

        let err = Speller::new(&mutator, &lexicon).unwrap_err();
        match err {
            OlError::AlphabetTranslation(symbol) => assert_eq!(symbol, "q"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn insertions_come_from_mutator_epsilons() {
        // The model may insert an "h" before anything at cost 2.
        let lexicon = lexicon();
        let mut b = TransducerBuilder::new(true);
        for letter in ["a", "t", "h"] {
            b.add_arc(0, letter, letter, 0, 0.0);
        }
        b.add_arc(0, crate::alphabet::EPSILON_STRING, "h", 0, 2.0);
        b.set_final(0, 0.0);
        let mutator = b.build().unwrap();
        let speller = Speller::new(&mutator, &lexicon).unwrap();

        let corrections = speller.correct("at");
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].string, "hat");
        assert_eq!(corrections[0].weight, 2.5);
    }
}
