//! Resource amount parsing and arithmetic.
//!
//! Amounts are written as `<digits>[<scale>][<unit>]`, e.g. `4`, `256gb`, `2tw`.
//! `scale` is one of `k`, `m`, `g`, `t` (binary, base 1024); `unit` is `b` (bytes) or
//! `w` (words). Both are optional and case-insensitive. Arithmetic is always performed
//! against the base (unscaled) total; a bare count and a `b`/`w`-suffixed count never
//! compare equal even if their totals match, since they describe different things.

use std::fmt;

use crate::error::{OrchestratorError, Result};

/// A resource unit, carried through arithmetic so amounts of different units are
/// never silently added together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// No unit suffix: a plain count (cores, gpus, nodes, ...).
    None,
    Bytes,
    Words,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::None => "",
            Unit::Bytes => "b",
            Unit::Words => "w",
        }
    }
}

/// A parsed resource amount, keeping both the base total (for arithmetic) and the
/// original scale/unit (so it prints the way it was written, e.g. a user-supplied
/// `256gb` still renders as `256gb` rather than `262144mb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount {
    total: u64,
    unit: Unit,
}

fn scale_power(scale: char) -> Option<u32> {
    match scale.to_ascii_lowercase() {
        'k' => Some(1),
        'm' => Some(2),
        'g' => Some(3),
        't' => Some(4),
        _ => None,
    }
}

fn scale_char(power: u32) -> &'static str {
    match power {
        0 => "",
        1 => "k",
        2 => "m",
        3 => "g",
        4 => "t",
        _ => unreachable!("power never exceeds the largest scale we reduce to"),
    }
}

impl Amount {
    pub fn new(total: u64, unit: Unit) -> Self {
        Amount { total, unit }
    }

    pub fn total(self) -> u64 {
        self.total
    }

    pub fn unit(self) -> Unit {
        self.unit
    }

    /// Parses a resource amount string per the grammar above.
    ///
    /// A hand-written scan rather than a regex: the grammar is small, and a regex
    /// would silently accept partial matches unless anchored and re-validated anyway.
    pub fn parse(input: &str) -> Result<Amount> {
        let trimmed = input.trim();
        let bytes = trimmed.as_bytes();
        if bytes.is_empty() {
            return Err(OrchestratorError::ResourceParse {
                input: input.to_string(),
            });
        }

        let digit_end = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        if digit_end == 0 {
            return Err(OrchestratorError::ResourceParse {
                input: input.to_string(),
            });
        }
        let numeric: u64 = trimmed[..digit_end]
            .parse()
            .map_err(|_| OrchestratorError::ResourceParse {
                input: input.to_string(),
            })?;

        let rest = &trimmed[digit_end..];
        let mut chars = rest.chars();
        let (power, unit) = match (chars.next(), chars.next(), chars.clone().next()) {
            (None, _, _) => (0, Unit::None),
            (Some(c), None, _) if c.eq_ignore_ascii_case(&'b') => (0, Unit::Bytes),
            (Some(c), None, _) if c.eq_ignore_ascii_case(&'w') => (0, Unit::Words),
            (Some(s), Some(u), None) if scale_power(s).is_some() && u.eq_ignore_ascii_case(&'b') => {
                (scale_power(s).unwrap(), Unit::Bytes)
            }
            (Some(s), Some(u), None) if scale_power(s).is_some() && u.eq_ignore_ascii_case(&'w') => {
                (scale_power(s).unwrap(), Unit::Words)
            }
            (Some(s), None, _) if scale_power(s).is_some() => (scale_power(s).unwrap(), Unit::None),
            _ => {
                return Err(OrchestratorError::ResourceParse {
                    input: input.to_string(),
                })
            }
        };

        let total = numeric
            .checked_mul(1024u64.checked_pow(power).ok_or_else(|| {
                OrchestratorError::ResourceParse {
                    input: input.to_string(),
                }
            })?)
            .ok_or_else(|| OrchestratorError::ResourceParse {
                input: input.to_string(),
            })?;

        Ok(Amount { total, unit })
    }

    /// Renders the amount using the largest scale whose ceiling fits, i.e.
    /// `ceil(total / 1024^power)` for the biggest `power` still worth using. Matches
    /// `reduce()` in the source material: prefer fewer digits over exact
    /// reproduction, rounding up rather than truncating.
    pub fn reduce(self) -> String {
        if self.total == 0 {
            return format!("0{}", self.unit.suffix());
        }
        let mut power = 0u32;
        for p in (1..=4).rev() {
            if self.total >= 1024u64.pow(p) {
                power = p;
                break;
            }
        }
        let divisor = 1024u64.pow(power);
        let best = self.total.div_ceil(divisor);
        format!("{best}{}{}", scale_char(power), self.unit.suffix())
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        if self.unit != other.unit {
            return None;
        }
        self.total.checked_add(other.total).map(|total| Amount {
            total,
            unit: self.unit,
        })
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        if self.unit != other.unit {
            return None;
        }
        self.total.checked_sub(other.total).map(|total| Amount {
            total,
            unit: self.unit,
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reduce())
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.unit != other.unit {
            return None;
        }
        Some(self.total.cmp(&other.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_count() {
        let a = Amount::parse("4").unwrap();
        assert_eq!(a.total(), 4);
        assert_eq!(a.unit(), Unit::None);
    }

    #[test]
    fn parses_scaled_bytes() {
        let a = Amount::parse("256gb").unwrap();
        assert_eq!(a.total(), 256 * 1024 * 1024 * 1024);
        assert_eq!(a.unit(), Unit::Bytes);
    }

    #[test]
    fn parses_case_insensitive() {
        let a = Amount::parse("2T").unwrap();
        assert_eq!(a.total(), 2 * 1024u64.pow(4));
        let b = Amount::parse("2TW").unwrap();
        assert_eq!(b.unit(), Unit::Words);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Amount::parse("gb").is_err());
        assert!(Amount::parse("4x").is_err());
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("4kbw").is_err());
    }

    #[test]
    fn reduce_round_trips() {
        assert_eq!(Amount::parse("256gb").unwrap().reduce(), "256gb");
        assert_eq!(Amount::new(1024, Unit::Bytes).reduce(), "1kb");
        assert_eq!(Amount::new(0, Unit::None).reduce(), "0");
    }

    #[test]
    fn reduce_rounds_up_non_power_totals() {
        assert_eq!(Amount::new(1500, Unit::Bytes).reduce(), "2kb");
    }

    #[test]
    fn mismatched_units_refuse_to_combine() {
        let a = Amount::parse("4gb").unwrap();
        let b = Amount::parse("4gw").unwrap();
        assert!(a.checked_add(b).is_none());
        assert_eq!(a.partial_cmp(&b), None);
    }
}
