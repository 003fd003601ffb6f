use std::fmt::{Display, Formatter};

use itertools::Itertools;
use strum_macros::Display;

use crate::common::{parse_int_from_str, tokens, Res};
use crate::EngineError;

/// UCI can't encode an empty token, so engines declare and expect explicitly empty
/// string values as this sentinel. The sentinel is unwrapped when parsing and
/// re-wrapped when serializing; the rest of the crate only ever sees real strings.
pub const EMPTY_SENTINEL: &str = "<empty>";

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct UciCheck {
    pub val: Option<bool>,
    pub default: Option<bool>,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct UciSpin {
    pub val: Option<i64>,
    pub default: Option<i64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct UciCombo {
    pub val: Option<String>,
    pub default: Option<String>,
    /// The declared `var` tokens, in declaration order. Duplicates are kept but
    /// meaningless.
    pub vars: Vec<String>,
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct UciString {
    pub val: Option<String>,
    pub default: Option<String>,
}

/// The five option kinds of the UCI protocol as a tagged union. The kind-specific
/// payload carries the declared default and bounds next to the host-set value.
#[derive(Debug, Clone, Eq, PartialEq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OptionValue {
    Check(UciCheck),
    Spin(UciSpin),
    Combo(UciCombo),
    Button,
    #[strum(serialize = "string")]
    Text(UciString),
}

use OptionValue::*;

/// One engine-declared option: a (possibly multi-token, case-sensitive) identifier
/// plus the kind-specific state. Created by [`EngineOption::parse`], mutated only
/// through the `set_*` methods, serialized by [`EngineOption::setoption_command`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EngineOption {
    pub name: String,
    pub value: OptionValue,
}

impl Display for EngineOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' (type {})", self.name, self.value)
    }
}

impl EngineOption {
    /// Parses one declaration, given everything after the leading `option` token:
    /// `name <id-tokens...> type <kind> [default <v>] [min <v>] [max <v>] (var <v>)*`.
    ///
    /// The identifier is every token between `name` and the literal token `type`,
    /// rejoined with single spaces; names like "Clear Hash" legitimately contain
    /// spaces, so this greedy consumption is required. Attribute tokens that don't
    /// apply to the declared kind, or aren't recognized at all, are skipped so that
    /// protocol extensions don't break the handshake.
    pub fn parse(declaration: &str) -> Res<EngineOption> {
        let malformed = |reason: String| EngineError::MalformedOption {
            line: declaration.to_string(),
            reason,
        };
        let mut words = tokens(declaration);
        match words.next() {
            Some("name") => (),
            Some(word) => return Err(malformed(format!("expected 'name', got '{word}'"))),
            None => return Err(malformed("empty declaration".to_string())),
        }
        let mut name_tokens = vec![];
        loop {
            match words.next() {
                Some("type") => break,
                Some(word) => name_tokens.push(word),
                None => return Err(malformed("missing 'type'".to_string())),
            }
        }
        if name_tokens.is_empty() {
            return Err(malformed("empty option name".to_string()));
        }
        let name = name_tokens.iter().join(" ");
        let mut value = match words.next() {
            Some("check") => Check(UciCheck::default()),
            Some("spin") => Spin(UciSpin::default()),
            Some("combo") => Combo(UciCombo::default()),
            Some("button") => Button,
            Some("string") => Text(UciString::default()),
            Some(_) => return Err(EngineError::UnknownOptionType(declaration.to_string())),
            None => return Err(malformed("line ends after 'type'".to_string())),
        };
        let parse_bound = |word: &str, what: &str| -> Res<i64> {
            parse_int_from_str(word, what).map_err(|err| malformed(err.to_string()))
        };
        while let Some(attribute) = words.next() {
            match attribute {
                "default" => {
                    let word = words.next();
                    match &mut value {
                        Check(c) => match word.map(str::to_ascii_lowercase).as_deref() {
                            Some("true") | Some("on") => c.default = Some(true),
                            Some("false") | Some("off") => c.default = Some(false),
                            Some(x) => {
                                return Err(malformed(format!(
                                    "check default should be 'true' or 'false', got '{x}'"
                                )))
                            }
                            None => return Err(malformed("missing check default".to_string())),
                        },
                        Spin(s) => match word {
                            Some(x) => s.default = Some(parse_bound(x, "spin default")?),
                            None => return Err(malformed("missing spin default".to_string())),
                        },
                        Combo(c) => match word {
                            Some(x) => c.default = Some(x.to_string()),
                            None => return Err(malformed("missing combo default".to_string())),
                        },
                        // a 'default' clause ending the line means an empty string
                        Text(s) => match word {
                            Some(EMPTY_SENTINEL) | None => s.default = Some(String::new()),
                            Some(x) => s.default = Some(x.to_string()),
                        },
                        Button => {
                            return Err(malformed("a button can't have a default".to_string()))
                        }
                    }
                }
                "min" => match (&mut value, words.next()) {
                    (Spin(s), Some(word)) => s.min = Some(parse_bound(word, "spin min")?),
                    (_, Some(_)) => (),
                    (_, None) => return Err(malformed("missing min value".to_string())),
                },
                "max" => match (&mut value, words.next()) {
                    (Spin(s), Some(word)) => s.max = Some(parse_bound(word, "spin max")?),
                    (_, Some(_)) => (),
                    (_, None) => return Err(malformed("missing max value".to_string())),
                },
                "var" => match (&mut value, words.next()) {
                    (Combo(c), Some(word)) => c.vars.push(word.to_string()),
                    (_, Some(_)) => (),
                    (_, None) => return Err(malformed("missing var value".to_string())),
                },
                _ => { /* skip unrecognized attributes */ }
            }
        }
        Ok(EngineOption { name, value })
    }

    fn kind_mismatch(&self, value: &str) -> EngineError {
        EngineError::InvalidOptionValue {
            name: format!("{} (type {})", self.name, self.value),
            value: value.to_string(),
        }
    }

    pub fn set_check(&mut self, val: bool) -> Res<()> {
        match &mut self.value {
            Check(c) => {
                c.val = Some(val);
                Ok(())
            }
            _ => Err(self.kind_mismatch(&val.to_string())),
        }
    }

    /// Spin assignments are deliberately not range-checked against min/max: engines
    /// commonly accept out-of-range values and clamp them themselves.
    pub fn set_spin(&mut self, val: i64) -> Res<()> {
        match &mut self.value {
            Spin(s) => {
                s.val = Some(val);
                Ok(())
            }
            _ => Err(self.kind_mismatch(&val.to_string())),
        }
    }

    /// Fails with [`EngineError::InvalidOptionValue`] without changing the stored
    /// value if `val` isn't in the declared `var` set. A declaration without any
    /// `var` tokens accepts everything.
    pub fn set_combo(&mut self, val: &str) -> Res<()> {
        match &mut self.value {
            Combo(c) => {
                if !c.vars.is_empty() && !c.vars.iter().any(|v| v == val) {
                    return Err(EngineError::InvalidOptionValue {
                        name: self.name.clone(),
                        value: val.to_string(),
                    });
                }
                c.val = Some(val.to_string());
                Ok(())
            }
            _ => Err(self.kind_mismatch(val)),
        }
    }

    pub fn set_string(&mut self, val: &str) -> Res<()> {
        match &mut self.value {
            Text(s) => {
                s.val = Some(val.to_string());
                Ok(())
            }
            _ => Err(self.kind_mismatch(val)),
        }
    }

    /// Clears the host-set value, so the option serializes to no command again.
    pub fn reset(&mut self) {
        match &mut self.value {
            Check(c) => c.val = None,
            Spin(s) => s.val = None,
            Combo(c) => c.val = None,
            Button => (),
            Text(s) => s.val = None,
        }
    }

    pub fn check_value(&self) -> Option<bool> {
        match &self.value {
            Check(c) => c.val.or(c.default),
            _ => None,
        }
    }

    pub fn spin_value(&self) -> Option<i64> {
        match &self.value {
            Spin(s) => s.val.or(s.default),
            _ => None,
        }
    }

    pub fn spin_min(&self) -> Option<i64> {
        match &self.value {
            Spin(s) => s.min,
            _ => None,
        }
    }

    pub fn spin_max(&self) -> Option<i64> {
        match &self.value {
            Spin(s) => s.max,
            _ => None,
        }
    }

    pub fn combo_value(&self) -> Option<String> {
        match &self.value {
            Combo(c) => c.val.clone().or_else(|| c.default.clone()),
            _ => None,
        }
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        match &self.value {
            Combo(c) => Some(&c.vars),
            _ => None,
        }
    }

    pub fn string_value(&self) -> Option<String> {
        match &self.value {
            Text(s) => s.val.clone().or_else(|| s.default.clone()),
            _ => None,
        }
    }

    pub fn is_button(&self) -> bool {
        matches!(self.value, Button)
    }

    /// The `setoption` command for the current value, or `None` if the host never
    /// set one; an option that was never touched must not be sent to the engine.
    pub fn setoption_command(&self) -> Option<String> {
        let value = match &self.value {
            Check(c) => c.val.map(|b| b.to_string()),
            Spin(s) => s.val.map(|v| v.to_string()),
            Combo(c) => c.val.clone(),
            Button => None,
            Text(s) => s.val.clone().map(|v| {
                if v.is_empty() {
                    EMPTY_SENTINEL.to_string()
                } else {
                    v
                }
            }),
        }?;
        Some(format!("setoption name {} value {value}", self.name))
    }

    /// Buttons carry no value; firing one is a bare `setoption name <id>`.
    pub fn fire_command(&self) -> String {
        format!("setoption name {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_spin_with_bounds() {
        let option = EngineOption::parse("name Hash type spin default 16 min 1 max 33554432").unwrap();
        assert_eq!(option.name, "Hash");
        assert_eq!(
            option.value,
            Spin(UciSpin { val: None, default: Some(16), min: Some(1), max: Some(33_554_432) })
        );
        assert_eq!(option.spin_value(), Some(16));
        assert_eq!(option.spin_min(), Some(1));
        assert_eq!(option.spin_max(), Some(33_554_432));
        // nothing set yet, so nothing should be sent
        assert_eq!(option.setoption_command(), None);
    }

    #[test]
    fn option_names_may_contain_spaces() {
        let option = EngineOption::parse("name Clear Hash type button").unwrap();
        assert_eq!(option.name, "Clear Hash");
        assert!(option.is_button());
        assert_eq!(option.fire_command(), "setoption name Clear Hash");
    }

    #[test]
    fn parses_a_combo_with_vars_in_order() {
        let option =
            EngineOption::parse("name Style type combo default Normal var Solid var Normal var Risky")
                .unwrap();
        assert_eq!(option.allowed_values().unwrap(), ["Solid", "Normal", "Risky"]);
        assert_eq!(option.combo_value(), Some("Normal".to_string()));
    }

    #[test]
    fn check_round_trip() {
        let mut option = EngineOption::parse("name Ponder type check default false").unwrap();
        assert_eq!(option.check_value(), Some(false));
        option.set_check(true).unwrap();
        let command = option.setoption_command().unwrap();
        assert_eq!(command, "setoption name Ponder value true");
        assert_eq!(command.rsplit(' ').next().unwrap().parse::<bool>().unwrap(), true);
    }

    #[test]
    fn spin_round_trip() {
        let mut option = EngineOption::parse("name Threads type spin default 1 min 1 max 512").unwrap();
        option.set_spin(8).unwrap();
        let command = option.setoption_command().unwrap();
        assert_eq!(command, "setoption name Threads value 8");
        assert_eq!(command.rsplit(' ').next().unwrap().parse::<i64>().unwrap(), 8);
        assert_eq!(option.spin_value(), Some(8));
        option.reset();
        assert_eq!(option.spin_value(), Some(1));
        assert_eq!(option.setoption_command(), None);
    }

    #[test]
    fn string_round_trip_wraps_the_empty_sentinel() {
        let mut option = EngineOption::parse("name Book File type string default <empty>").unwrap();
        assert_eq!(option.name, "Book File");
        assert_eq!(option.string_value(), Some(String::new()));
        option.set_string("openings.bin").unwrap();
        assert_eq!(option.setoption_command().unwrap(), "setoption name Book File value openings.bin");
        option.set_string("").unwrap();
        assert_eq!(option.setoption_command().unwrap(), "setoption name Book File value <empty>");
        let reparsed = EngineOption::parse("name Book File type string default <empty>").unwrap();
        assert_eq!(reparsed.string_value(), Some(String::new()));
    }

    #[test]
    fn string_default_may_end_the_line() {
        let option = EngineOption::parse("name Debug Log File type string default").unwrap();
        assert_eq!(option.string_value(), Some(String::new()));
    }

    #[test]
    fn combo_rejects_values_outside_the_var_set() {
        let mut option =
            EngineOption::parse("name Style type combo default Normal var Solid var Normal var Risky")
                .unwrap();
        option.set_combo("Solid").unwrap();
        let err = option.set_combo("Reckless").unwrap_err();
        assert!(matches!(err, EngineError::InvalidOptionValue { .. }));
        // the failed set must leave the previous value untouched
        assert_eq!(option.combo_value(), Some("Solid".to_string()));
        assert_eq!(option.setoption_command().unwrap(), "setoption name Style value Solid");
    }

    #[test]
    fn combo_without_vars_accepts_anything() {
        let mut option = EngineOption::parse("name Personality type combo").unwrap();
        option.set_combo("Aggressive").unwrap();
        assert_eq!(option.combo_value(), Some("Aggressive".to_string()));
    }

    #[test]
    fn unknown_kind_is_rejected_with_the_line() {
        let err = EngineOption::parse("name Fancy type slider min 0 max 10").unwrap_err();
        let EngineError::UnknownOptionType(line) = err else {
            panic!("expected UnknownOptionType, got {err}")
        };
        assert_eq!(line, "name Fancy type slider min 0 max 10");
    }

    #[test]
    fn unrecognized_attributes_are_skipped() {
        let option = EngineOption::parse("name Hash type spin granularity default 16 min 1 max 64")
            .unwrap();
        assert_eq!(option.spin_value(), Some(16));
        // attributes that don't apply to the kind are skipped together with their value
        let option = EngineOption::parse("name Ponder type check min 0 default true").unwrap();
        assert_eq!(option.check_value(), Some(true));
    }

    #[test]
    fn setting_the_wrong_kind_fails() {
        let mut option = EngineOption::parse("name Ponder type check").unwrap();
        assert!(option.set_spin(3).is_err());
        assert!(option.set_check(true).is_ok());
    }
}
