use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// An amount with a unit, e.g. `400m` or `95lb`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quantity {
    pub amount: f64,
    pub unit: String,
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let amount = number
            .parse::<f64>()
            .map_err(|_| format!("expected a number followed by a unit, got '{}'", s))?;
        Ok(Quantity {
            amount,
            unit: unit.trim().to_string(),
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amount == self.amount.floor() && self.amount.abs() < 1e15 {
            write!(f, "{}{}", self.amount as i64, self.unit)
        } else {
            write!(f, "{}{}", self.amount, self.unit)
        }
    }
}
