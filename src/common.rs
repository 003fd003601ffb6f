use std::str::{FromStr, SplitWhitespace};

use num::PrimInt;

use crate::EngineError;

pub type Res<T> = Result<T, EngineError>;

/// UCI is tokenized on arbitrary whitespace; every parser in this crate works on
/// this iterator type instead of re-splitting strings.
pub type Tokens<'a> = SplitWhitespace<'a>;

pub fn tokens(message: &str) -> Tokens {
    message.split_whitespace()
}

pub fn parse_int_from_str<T: PrimInt + FromStr>(as_str: &str, name: &str) -> Res<T> {
    // parse::<T>() returns an unbounded error type for a generic T,
    // so the error message is written here instead
    as_str.parse::<T>().map_err(|_err| EngineError::Parse {
        name: name.to_string(),
        text: as_str.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_collapse_whitespace() {
        let mut words = tokens("  setoption   name\tClear Hash ");
        assert_eq!(words.next(), Some("setoption"));
        assert_eq!(words.next(), Some("name"));
        assert_eq!(words.next(), Some("Clear"));
        assert_eq!(words.next(), Some("Hash"));
        assert_eq!(words.next(), None);
    }

    #[test]
    fn parse_int_reports_the_offending_text() {
        let err = parse_int_from_str::<i64>("12x", "depth").unwrap_err();
        assert!(matches!(err, EngineError::Parse { .. }));
        assert_eq!(err.to_string(), "couldn't parse depth ('12x')");
        assert_eq!(parse_int_from_str::<u64>("300000", "wtime").unwrap(), 300_000);
    }
}
