use rust_decimal::Decimal;

use crate::error::TaxEngineError;
use crate::types::{Money, Rate, TaxBracket};
use crate::TaxEngineResult;

/// Walk brackets in ascending order, taxing each half-open slice
/// `[bracket.min, bracket.max)` at its rate until income is exhausted.
///
/// Returns the accumulated tax at full precision plus the number of brackets
/// that contributed. The result is independent of how many brackets exist
/// above the income level.
pub fn progressive_tax(income: Money, brackets: &[TaxBracket]) -> TaxEngineResult<(Money, u32)> {
    if brackets.is_empty() {
        return Err(TaxEngineError::Calculation(
            "progressive tax requires a non-empty bracket table".into(),
        ));
    }
    let mut tax = Decimal::ZERO;
    let mut consumed = 0u32;
    for bracket in brackets {
        if income <= bracket.min {
            break;
        }
        let upper = match bracket.max {
            Some(max) => income.min(max),
            None => income,
        };
        let slice = (upper - bracket.min).max(Decimal::ZERO);
        if slice > Decimal::ZERO {
            tax += slice * bracket.rate;
            consumed += 1;
        }
    }
    Ok((tax, consumed))
}

/// Rate of the bracket containing `income`. Income above the highest
/// bracket's lower bound takes that bracket's rate.
pub fn marginal_rate(income: Money, brackets: &[TaxBracket]) -> TaxEngineResult<Rate> {
    if brackets.is_empty() {
        return Err(TaxEngineError::Calculation(
            "marginal rate requires a non-empty bracket table".into(),
        ));
    }
    for bracket in brackets {
        let in_range = income >= bracket.min
            && match bracket.max {
                Some(max) => income < max,
                None => true,
            };
        if in_range {
            return Ok(bracket.rate);
        }
    }
    // Defensive fallthrough for a malformed table; load-time validation makes
    // the tail open-ended so this is unreachable for stored rules.
    Ok(brackets[brackets.len() - 1].rate)
}

/// `tax / income`, defined as zero when income is zero.
///
/// Callers pass the income-tax layer, so the result stays comparable to the
/// bracket marginal rate; payroll layers have their own rates and caps.
pub fn effective_rate(tax: Money, income: Money) -> Rate {
    if income <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        tax / income
    }
}
