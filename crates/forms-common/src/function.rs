use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Functions the planner can place in a plan tree.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Function {
    Sum,
    Average,
    Count,
    Min,
    Max,
    Plus,
    Minus,
    Multiply,
    Divide,
    Lookup,
    Vlookup,
}

/// Accepted argument count, inclusive on both ends. `max == None` is variadic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.is_none_or(|m| n <= m)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{max}"),
            Some(max) => write!(f, "{}..={max}", self.min),
            None => write!(f, "{}..", self.min),
        }
    }
}

impl Function {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Average => "AVERAGE",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Lookup => "LOOKUP",
            Self::Vlookup => "VLOOKUP",
        }
    }

    pub const fn arity(self) -> Arity {
        match self {
            Self::Sum | Self::Average | Self::Count | Self::Min | Self::Max => Arity::at_least(1),
            Self::Plus | Self::Minus | Self::Multiply | Self::Divide => Arity::exactly(2),
            // LOOKUP(value, search[, result])
            Self::Lookup => Arity::between(2, 3),
            // VLOOKUP(value, table, col_index[, approximate])
            Self::Vlookup => Arity::between(3, 4),
        }
    }

    /// Aggregates whose result over a window can be derived from the result
    /// over an adjacent window (the FR/RF incremental evaluation candidates).
    pub const fn is_distributive(self) -> bool {
        matches!(self, Self::Sum | Self::Count | Self::Min | Self::Max)
    }

    pub const fn is_lookup(self) -> bool {
        matches!(self, Self::Lookup | Self::Vlookup)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Layout specialization hint attached to function nodes by the planner.
///
/// `Fr` and `Rf` mark aggregates over growing (fixed-relative) or shrinking
/// (relative-fixed) windows, which the executor can evaluate incrementally.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum FrRfOptimization {
    #[default]
    NoOpt,
    Fr,
    Rf,
}
