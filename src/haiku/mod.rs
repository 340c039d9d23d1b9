/// Haiku codec - bijection between unsigned integers and word symbols
///
/// A symbol is the positional base-|D| representation of a non-negative
/// integer over a fixed word dictionary D, most-significant word first,
/// joined with `-`. Because the encoding is positional rather than hashed,
/// distinct values can never collide, so symbol equality is value equality.

mod words;

use crate::error::{FpError, FpResult};
use lazy_static::lazy_static;
use std::collections::HashMap;
use words::WORDS;

lazy_static! {
    /// Inverse lookup, built once at first use and immutable afterwards.
    static ref WORD_INDEX: HashMap<&'static str, u64> = {
        let mut map = HashMap::with_capacity(WORDS.len());
        for (i, word) in WORDS.iter().enumerate() {
            map.insert(*word, i as u64);
        }
        map
    };
}

const BASE: u64 = WORDS.len() as u64;

/// Encode a value as a haiku symbol
///
/// Zero maps to the word at dictionary index 0.
pub fn encode(n: u64) -> String {
    if n == 0 {
        return WORDS[0].to_string();
    }

    let mut digits = Vec::new();
    let mut rest = n;
    while rest > 0 {
        digits.push((rest % BASE) as usize);
        rest /= BASE;
    }
    digits.reverse();

    let parts: Vec<&str> = digits.into_iter().map(|d| WORDS[d]).collect();
    parts.join("-")
}

/// Decode a haiku symbol back to its value
///
/// Fails with `BadSymbol` on the empty string, on a word outside the
/// dictionary, and on symbols too long to fit in a u64.
pub fn decode(symbol: &str) -> FpResult<u64> {
    if symbol.is_empty() {
        return Err(FpError::bad_symbol(symbol, "empty symbol"));
    }

    let mut n: u64 = 0;
    for word in symbol.split('-') {
        let digit = *WORD_INDEX
            .get(word)
            .ok_or_else(|| FpError::bad_symbol(symbol, format!("unknown word: {}", word)))?;
        n = n
            .checked_mul(BASE)
            .and_then(|n| n.checked_add(digit))
            .ok_or_else(|| FpError::bad_symbol(symbol, "value overflows u64"))?;
    }

    Ok(n)
}

/// Encode a list of values
pub fn encode_many(values: &[u64]) -> Vec<String> {
    values.iter().map(|&n| encode(n)).collect()
}

/// Decode a list of symbols, failing on the first bad one
pub fn decode_many<S: AsRef<str>>(symbols: &[S]) -> FpResult<Vec<u64>> {
    symbols.iter().map(|s| decode(s.as_ref())).collect()
}
