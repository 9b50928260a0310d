use crate::{Error, RegionFilter, ScanType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How scanned values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareKind {
    /// Value equals the operand.
    Exact,
    /// Value is smaller than the operand.
    SmallerThan,
    /// Value is bigger than the operand.
    BiggerThan,
    /// Value lies in the inclusive operand range.
    Between,
    /// Record everything; narrowed by later relations.
    UnknownInitial,
    /// Value grew since the previous observation.
    Increased,
    /// Value grew by exactly the operand.
    IncreasedBy,
    /// Value shrank since the previous observation.
    Decreased,
    /// Value shrank by exactly the operand.
    DecreasedBy,
}

impl CompareKind {
    /// If the comparison relates to a previously observed value.
    pub fn requires_initial(self) -> bool {
        use self::CompareKind::*;

        matches!(self, Increased | IncreasedBy | Decreased | DecreasedBy)
    }

    /// If the comparison takes an operand at all.
    pub fn takes_operand(self) -> bool {
        use self::CompareKind::*;

        !matches!(self, UnknownInitial | Increased | Decreased)
    }
}

impl fmt::Display for CompareKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompareKind::Exact => "exact",
            CompareKind::SmallerThan => "smaller than",
            CompareKind::BiggerThan => "bigger than",
            CompareKind::Between => "between",
            CompareKind::UnknownInitial => "unknown initial",
            CompareKind::Increased => "increased",
            CompareKind::IncreasedBy => "increased by",
            CompareKind::Decreased => "decreased",
            CompareKind::DecreasedBy => "decreased by",
        };

        name.fmt(fmt)
    }
}

/// A fully validated scan constraint.
///
/// Operand text is parsed into typed values once, at construction. The scan
/// loops only ever see decoded values and typed operands.
#[derive(Debug, Clone)]
pub struct ScanConstraint {
    pub kind: CompareKind,
    pub ty: ScanType,
    operand: Option<Value>,
    second: Option<Value>,
    /// Which regions the scan should take in.
    pub filter: RegionFilter,
}

impl ScanConstraint {
    /// Construct a constraint, parsing `input` according to the kind.
    ///
    /// `between` expects two operands separated by `-`, everything else that
    /// takes an operand expects one, and the rest expect none.
    pub fn new(kind: CompareKind, ty: ScanType, input: &str) -> Result<Self, Error> {
        let input = input.trim();

        let (operand, second) = match kind {
            CompareKind::UnknownInitial | CompareKind::Increased | CompareKind::Decreased => {
                if !input.is_empty() {
                    return Err(Error::UnexpectedOperand(kind));
                }

                (None, None)
            }
            CompareKind::Between => {
                if input.is_empty() {
                    return Err(Error::MissingSecondOperand(kind));
                }

                // a leading `-` belongs to the first operand
                let split = input[1..]
                    .find('-')
                    .map(|n| n + 1)
                    .ok_or(Error::MissingSecondOperand(kind))?;

                let low = ty.parse(&input[..split])?;
                let high = ty.parse(&input[split + 1..])?;
                (Some(low), Some(high))
            }
            _ => (Some(ty.parse(input)?), None),
        };

        Ok(Self {
            kind,
            ty,
            operand,
            second,
            filter: RegionFilter::default(),
        })
    }

    /// Replace the region filter.
    pub fn with_filter(mut self, filter: RegionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The primary operand, if the kind takes one.
    pub fn operand(&self) -> Option<&Value> {
        self.operand.as_ref()
    }

    /// The second operand, for `between`.
    pub fn second(&self) -> Option<&Value> {
        self.second.as_ref()
    }

    /// Test a value in the first pass, with no prior observation.
    pub fn matches_initial(&self, current: &Value) -> bool {
        match self.kind {
            CompareKind::Exact => matches_operand(current, &self.operand, Value::eq_value),
            CompareKind::SmallerThan => matches_operand(current, &self.operand, Value::lt),
            CompareKind::BiggerThan => matches_operand(current, &self.operand, Value::gt),
            CompareKind::Between => {
                matches_operand(current, &self.operand, Value::ge)
                    && matches_operand(current, &self.second, Value::le)
            }
            CompareKind::UnknownInitial => true,
            _ => false,
        }
    }

    /// Test a value against the previously observed one.
    pub fn matches_next(&self, current: &Value, previous: &Value) -> bool {
        match self.kind {
            CompareKind::UnknownInitial => true,
            CompareKind::Increased => current.gt(previous),
            CompareKind::Decreased => current.lt(previous),
            CompareKind::IncreasedBy => match &self.operand {
                Some(delta) => match previous.checked_add(delta) {
                    Some(expected) => current.eq_value(&expected),
                    None => false,
                },
                None => false,
            },
            CompareKind::DecreasedBy => match &self.operand {
                Some(delta) => match previous.checked_sub(delta) {
                    Some(expected) => current.eq_value(&expected),
                    None => false,
                },
                None => false,
            },
            _ => self.matches_initial(current),
        }
    }
}

fn matches_operand(
    current: &Value,
    operand: &Option<Value>,
    op: impl Fn(&Value, &Value) -> bool,
) -> bool {
    match operand {
        Some(operand) => op(current, operand),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{CompareKind, ScanConstraint};
    use crate::{ScanType, Value};

    #[test]
    fn test_parse_validation() {
        assert!(ScanConstraint::new(CompareKind::Exact, ScanType::I32, "42").is_ok());
        assert!(ScanConstraint::new(CompareKind::Exact, ScanType::I32, "nope").is_err());
        assert!(ScanConstraint::new(CompareKind::Between, ScanType::I32, "10").is_err());
        assert!(ScanConstraint::new(CompareKind::UnknownInitial, ScanType::I32, "10").is_err());
        assert!(ScanConstraint::new(CompareKind::Increased, ScanType::I32, "").is_ok());
    }

    #[test]
    fn test_between_with_negative_low() {
        let c = ScanConstraint::new(CompareKind::Between, ScanType::I32, "-10-20").unwrap();

        assert!(c.matches_initial(&Value::I32(-10)));
        assert!(c.matches_initial(&Value::I32(0)));
        assert!(c.matches_initial(&Value::I32(20)));
        assert!(!c.matches_initial(&Value::I32(21)));
        assert!(!c.matches_initial(&Value::I32(-11)));
    }

    #[test]
    fn test_initial_relations() {
        let c = ScanConstraint::new(CompareKind::SmallerThan, ScanType::I32, "5").unwrap();
        assert!(c.matches_initial(&Value::I32(4)));
        assert!(!c.matches_initial(&Value::I32(5)));

        let c = ScanConstraint::new(CompareKind::UnknownInitial, ScanType::I32, "").unwrap();
        assert!(c.matches_initial(&Value::I32(1234)));
    }

    #[test]
    fn test_delta_relations() {
        let c = ScanConstraint::new(CompareKind::IncreasedBy, ScanType::I32, "5").unwrap();
        assert!(c.matches_next(&Value::I32(15), &Value::I32(10)));
        assert!(!c.matches_next(&Value::I32(16), &Value::I32(10)));

        let c = ScanConstraint::new(CompareKind::Decreased, ScanType::I32, "").unwrap();
        assert!(c.matches_next(&Value::I32(9), &Value::I32(10)));
        assert!(!c.matches_next(&Value::I32(10), &Value::I32(10)));
    }

    #[test]
    fn test_overflow_delta_is_no_match() {
        let c = ScanConstraint::new(CompareKind::IncreasedBy, ScanType::U16, "1").unwrap();
        assert!(!c.matches_next(&Value::U16(0), &Value::U16(u16::MAX)));
    }
}
