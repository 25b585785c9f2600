use std::{collections::HashMap, fmt};

use crate::{Error, Result};

const DIGITS: &str = "0123456789";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

/// A vocabulary entry. Sentinels are distinct from every printable character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Char(char),
    Eos,
    Padding,
    Unknown,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Char(c) => write!(f, "{c}"),
            Symbol::Eos => f.write_str("EOS"),
            Symbol::Padding => f.write_str("PADDING"),
            Symbol::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Fixed index space shared with the trained recognizer.
///
/// Printable characters come first (digits, lowercase, uppercase, punctuation),
/// followed by `EOS`, `PADDING` and `UNKNOWN`. The order must match the one the
/// model was trained with; a different order still decodes, into garbage.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbols: Vec<Symbol>,
    ids: HashMap<Symbol, usize>,
}

impl Vocabulary {
    pub fn build() -> Self {
        let symbols = [DIGITS, LOWERCASE, UPPERCASE, PUNCTUATION]
            .into_iter()
            .flat_map(str::chars)
            .map(Symbol::Char)
            .chain([Symbol::Eos, Symbol::Padding, Symbol::Unknown])
            .collect::<Vec<_>>();
        let ids = symbols
            .iter()
            .enumerate()
            .map(|(id, symbol)| (*symbol, id))
            .collect();
        log::debug!("Built vocabulary with {} symbols", symbols.len());

        Self { symbols, ids }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn symbol_to_id(&self, symbol: Symbol) -> Result<usize> {
        self.ids
            .get(&symbol)
            .copied()
            .ok_or_else(|| Error::UnknownSymbol(symbol.to_string()))
    }

    /// Inverse of [`Vocabulary::symbol_to_id`] over every index, sentinels
    /// included. Only indices past the end fail.
    pub fn id_to_symbol(&self, id: usize) -> Result<Symbol> {
        self.symbols
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownSymbol(format!("index {id}")))
    }

    pub fn char_to_id(&self, c: char) -> Result<usize> {
        self.symbol_to_id(Symbol::Char(c))
    }

    /// Sentinel indices are not characters and fail like out-of-range ones.
    /// Use [`Vocabulary::id_to_symbol`] to map them.
    pub fn id_to_char(&self, id: usize) -> Result<char> {
        match self.id_to_symbol(id)? {
            Symbol::Char(c) => Ok(c),
            sentinel => Err(Error::UnknownSymbol(format!("{sentinel} (index {id})"))),
        }
    }

    pub fn eos_id(&self) -> usize {
        self.symbols.len() - 3
    }

    pub fn padding_id(&self) -> usize {
        self.symbols.len() - 2
    }

    pub fn unknown_id(&self) -> usize {
        self.symbols.len() - 1
    }

    /// Maps `text` to indices, substituting `UNKNOWN` for characters outside
    /// the vocabulary.
    pub fn encode_lossy(&self, text: &str) -> Vec<usize> {
        text.chars()
            .map(|c| self.char_to_id(c).unwrap_or_else(|_| self.unknown_id()))
            .collect()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_printable_plus_sentinels() {
        let vocab = Vocabulary::build();
        assert_eq!(vocab.len(), 94 + 3);
    }

    #[test]
    fn every_symbol_round_trips() {
        let vocab = Vocabulary::build();
        for &symbol in vocab.symbols() {
            let id = vocab.symbol_to_id(symbol).unwrap();
            assert_eq!(vocab.id_to_symbol(id).unwrap(), symbol);
            if let Symbol::Char(c) = symbol {
                assert_eq!(vocab.id_to_char(vocab.char_to_id(c).unwrap()).unwrap(), c);
            }
        }
    }

    #[test]
    fn sentinels_take_the_highest_indices_in_order() {
        let vocab = Vocabulary::build();
        let n = vocab.len();
        assert_eq!(vocab.id_to_symbol(n - 3).unwrap(), Symbol::Eos);
        assert_eq!(vocab.id_to_symbol(n - 2).unwrap(), Symbol::Padding);
        assert_eq!(vocab.id_to_symbol(n - 1).unwrap(), Symbol::Unknown);
        assert_eq!(vocab.eos_id(), 94);
    }

    #[test]
    fn base_characters_follow_the_fixed_enumeration() {
        let vocab = Vocabulary::build();
        assert_eq!(vocab.char_to_id('0').unwrap(), 0);
        assert_eq!(vocab.char_to_id('a').unwrap(), 10);
        assert_eq!(vocab.char_to_id('A').unwrap(), 36);
        assert_eq!(vocab.char_to_id('!').unwrap(), 62);
        assert_eq!(vocab.char_to_id('~').unwrap(), 93);
    }

    #[test]
    fn whitespace_and_out_of_range_are_unknown_symbols() {
        let vocab = Vocabulary::build();
        assert!(matches!(vocab.char_to_id(' '), Err(Error::UnknownSymbol(_))));
        assert!(matches!(vocab.char_to_id('é'), Err(Error::UnknownSymbol(_))));
        assert!(matches!(vocab.id_to_char(97), Err(Error::UnknownSymbol(_))));
        assert!(matches!(
            vocab.id_to_char(vocab.eos_id()),
            Err(Error::UnknownSymbol(_))
        ));
    }

    #[test]
    fn encode_lossy_substitutes_unknown() {
        let vocab = Vocabulary::build();
        let ids = vocab.encode_lossy("a b");
        assert_eq!(ids, vec![10, vocab.unknown_id(), 11]);
    }
}
