use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of argument a format specifier accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionCategory {
    /// Any value (`%s`, `%b`, `%h`)
    General,
    Char,
    Int,
    Float,
    Time,
    /// Both `%c` and `%d` use the argument
    CharAndInt,
    /// Both `%d` and `%t` use the argument
    IntAndTime,
    /// No non-null value is acceptable
    Null,
    /// The argument is never referenced by the format string
    Unused,
}

use ConversionCategory::*;

const CHAR_TYPES: &[&str] = &[
    "java.lang.Character",
    "java.lang.Byte",
    "java.lang.Short",
    "java.lang.Integer",
];
const INT_TYPES: &[&str] = &[
    "java.lang.Byte",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.math.BigInteger",
];
const FLOAT_TYPES: &[&str] = &["java.lang.Float", "java.lang.Double", "java.math.BigDecimal"];
const TIME_TYPES: &[&str] = &["java.lang.Long", "java.util.Calendar", "java.util.Date"];
const CHAR_AND_INT_TYPES: &[&str] = &["java.lang.Byte", "java.lang.Short", "java.lang.Integer"];
const INT_AND_TIME_TYPES: &[&str] = &["java.lang.Long"];

/// Categories with a finite type set, in the order set lookups try them
const FINITE: &[ConversionCategory] = &[Null, CharAndInt, IntAndTime, Char, Int, Float, Time];

impl ConversionCategory {
    /// Category of a conversion character. `%t`/`%T` are handled by the caller.
    pub fn from_conversion(c: char) -> Option<Self> {
        Some(match c {
            'b' | 'B' | 'h' | 'H' | 's' | 'S' => General,
            'c' | 'C' => Char,
            'd' | 'o' | 'x' | 'X' => Int,
            'e' | 'E' | 'f' | 'g' | 'G' | 'a' | 'A' => Float,
            _ => return None,
        })
    }

    /// Boxed classes an argument may have; `None` means any class
    pub fn types(self) -> Option<&'static [&'static str]> {
        match self {
            General | Unused => None,
            Char => Some(CHAR_TYPES),
            Int => Some(INT_TYPES),
            Float => Some(FLOAT_TYPES),
            Time => Some(TIME_TYPES),
            CharAndInt => Some(CHAR_AND_INT_TYPES),
            IntAndTime => Some(INT_AND_TIME_TYPES),
            Null => Some(&[]),
        }
    }

    fn from_types(types: &[&str]) -> Option<Self> {
        FINITE.iter().copied().find(|cat| {
            cat.types()
                .is_some_and(|set| set.len() == types.len() && set.iter().all(|t| types.contains(t)))
        })
    }

    /// The category accepting exactly what both accept
    pub fn intersect(a: Self, b: Self) -> Self {
        match (a, b) {
            (Unused, other) | (other, Unused) => other,
            (General, other) | (other, General) => other,
            _ => {
                let (Some(left), Some(right)) = (a.types(), b.types()) else {
                    return Null;
                };
                let common: Vec<&str> = left.iter().copied().filter(|t| right.contains(t)).collect();
                Self::from_types(&common).unwrap_or(Null)
            }
        }
    }

    /// The narrowest category accepting everything either accepts
    pub fn union(a: Self, b: Self) -> Self {
        match (a, b) {
            (Unused, _) | (_, Unused) => Unused,
            (General, _) | (_, General) => General,
            (CharAndInt, IntAndTime) | (IntAndTime, CharAndInt) => Int,
            _ => {
                let (Some(left), Some(right)) = (a.types(), b.types()) else {
                    return General;
                };
                let mut all: Vec<&str> = left.to_vec();
                all.extend(right.iter().copied().filter(|t| !left.contains(t)));
                Self::from_types(&all).unwrap_or(General)
            }
        }
    }

    /// True if every argument `self` accepts is also accepted by `other`
    pub fn is_subset_of(self, other: Self) -> bool {
        Self::intersect(self, other) == self
    }
}

impl fmt::Display for ConversionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            General => "GENERAL",
            Char => "CHAR",
            Int => "INT",
            Float => "FLOAT",
            Time => "TIME",
            CharAndInt => "CHAR_AND_INT",
            IntAndTime => "INT_AND_TIME",
            Null => "NULL",
            Unused => "UNUSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect() {
        assert_eq!(ConversionCategory::intersect(Char, Int), CharAndInt);
        assert_eq!(ConversionCategory::intersect(Int, Time), IntAndTime);
        assert_eq!(ConversionCategory::intersect(Float, Int), Null);
        assert_eq!(ConversionCategory::intersect(Unused, Float), Float);
        assert_eq!(ConversionCategory::intersect(General, Time), Time);
    }

    #[test]
    fn test_union() {
        assert_eq!(ConversionCategory::union(CharAndInt, IntAndTime), Int);
        assert_eq!(ConversionCategory::union(CharAndInt, Int), Int);
        assert_eq!(ConversionCategory::union(Float, Int), General);
        assert_eq!(ConversionCategory::union(Null, Float), Float);
        assert_eq!(ConversionCategory::union(Unused, Float), Unused);
    }

    #[test]
    fn test_subset() {
        assert!(CharAndInt.is_subset_of(Int));
        assert!(Null.is_subset_of(Time));
        assert!(Int.is_subset_of(General));
        assert!(!Int.is_subset_of(CharAndInt));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&CharAndInt).unwrap(), "\"CHAR_AND_INT\"");
        assert_eq!(CharAndInt.to_string(), "CHAR_AND_INT");
    }
}
