//! Russian soundex codes for typo-tolerant author matching.
//!
//! The input is transliterated to Latin (ISO 9 table) first, so the same
//! code comes out for a name regardless of the script it was typed in. The
//! code keeps the first letter verbatim, encodes later consonants into the
//! classic six digit buckets, collapses runs of identical digits, drops
//! vowels and h/w/y, and is always exactly four characters.

use super::translit::{self, Table};

const CODE_LEN: usize = 4;

fn digit_for(c: char) -> Option<char> {
    match c {
        'b' | 'f' | 'p' | 'v' => Some('1'),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
        'd' | 't' => Some('3'),
        'l' => Some('4'),
        'm' | 'n' => Some('5'),
        'r' => Some('6'),
        _ => None,
    }
}

/// Compute the four-character soundex code for a name or a single query
/// token. Equal inputs always produce equal codes.
pub fn encode(s: &str) -> String {
    let latin = translit::front(s, Table::Iso9);
    let letters: Vec<char> = latin
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let Some(&first) = letters.first() else {
        return "0".repeat(CODE_LEN);
    };

    let mut code = String::with_capacity(CODE_LEN);
    code.push(first.to_ascii_uppercase());
    let mut prev = digit_for(first);

    for &c in &letters[1..] {
        if code.len() == CODE_LEN {
            break;
        }
        let digit = digit_for(c);
        if let Some(d) = digit {
            if prev != Some(d) {
                code.push(d);
            }
        }
        prev = digit;
    }

    while code.len() < CODE_LEN {
        code.push('0');
    }
    code
}
