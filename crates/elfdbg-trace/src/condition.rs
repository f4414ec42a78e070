//! Register comparisons attached to conditional breakpoints.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::{TraceError, canonical_register_name};

static CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_]*)\s*(==|!=|<=|>=|<|>)\s*(0[xX][0-9a-fA-F]+|[0-9]+)\s*$")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn parse(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return None,
        })
    }

    pub const fn apply(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// `<register> <op> <number>`, compared unsigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    /// Canonical lower-case register name.
    pub register: &'static str,
    pub op: CompareOp,
    pub value: u64,
}

impl Condition {
    /// Evaluate against the current value of [`Self::register`].
    pub const fn evaluate(&self, register_value: u64) -> bool {
        self.op.apply(register_value, self.value)
    }
}

fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl FromStr for Condition {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TraceError::InvalidCondition(s.to_string());
        let caps = CONDITION.captures(s).ok_or_else(invalid)?;
        let register = canonical_register_name(&caps[1]).ok_or_else(invalid)?;
        let op = CompareOp::parse(&caps[2]).ok_or_else(invalid)?;
        let value = parse_number(&caps[3]).ok_or_else(invalid)?;
        Ok(Self {
            register,
            op,
            value,
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:#x}", self.register, self.op.symbol(), self.value)
    }
}
