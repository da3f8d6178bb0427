//! Closed-form debt amortization.

use serde::{Deserialize, Serialize};

use crate::money::round_cents;

/// Returned when the payment never retires the debt.
pub const NEVER_PAID_OFF_MONTHS: u32 = 999;

fn monthly_rate(annual_rate_pct: f64) -> f64 {
    annual_rate_pct.max(0.0) / 12.0 / 100.0
}

/// Whether `monthly_payment` retires any principal in the first month.
pub fn payment_covers_interest(principal: f64, annual_rate_pct: f64, monthly_payment: f64) -> bool {
    if !principal.is_finite() || principal <= 0.0 {
        return true;
    }
    monthly_payment.is_finite()
        && monthly_payment > 0.0
        && monthly_payment > principal * monthly_rate(annual_rate_pct)
}

/// Months needed to pay `principal` at `annual_rate_pct` with a fixed
/// `monthly_payment`, rounded up.
///
/// Uses `n = -ln(1 - r·P/M) / ln(1 + r)`. Returns
/// [`NEVER_PAID_OFF_MONTHS`] when the payment does not exceed the interest
/// accrued in the first month, and `0` when there is nothing owed. Long but
/// finite payoffs report their real length, saturating at `u32::MAX`.
pub fn months_to_payoff(principal: f64, annual_rate_pct: f64, monthly_payment: f64) -> u32 {
    if !principal.is_finite() || principal <= 0.0 {
        return 0;
    }
    if !payment_covers_interest(principal, annual_rate_pct, monthly_payment) {
        return NEVER_PAID_OFF_MONTHS;
    }

    let r = monthly_rate(annual_rate_pct);
    if r == 0.0 {
        return ceil_months(principal / monthly_payment);
    }

    let n = -(-r * principal / monthly_payment).ln_1p() / r.ln_1p();
    // shave float noise so exact payoffs don't round up a month
    ceil_months(n - 1e-9)
}

fn ceil_months(n: f64) -> u32 {
    let n = n.ceil();
    if !n.is_finite() || n >= u32::MAX as f64 {
        u32::MAX
    } else {
        n.max(1.0) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PayoffEstimate {
    pub months: u32,
    pub total_paid: f64,
    pub total_interest: f64,
    pub payoff_possible: bool,
}

/// Months plus the money paid along the way. The last payment only covers
/// what is left, so the total is `M·(n-1)` plus the final balance with its
/// interest.
pub fn payoff_schedule(principal: f64, annual_rate_pct: f64, monthly_payment: f64) -> PayoffEstimate {
    if !payment_covers_interest(principal, annual_rate_pct, monthly_payment) {
        return PayoffEstimate {
            months: NEVER_PAID_OFF_MONTHS,
            total_paid: 0.0,
            total_interest: 0.0,
            payoff_possible: false,
        };
    }
    let months = months_to_payoff(principal, annual_rate_pct, monthly_payment);
    if months == 0 {
        return PayoffEstimate {
            months,
            total_paid: 0.0,
            total_interest: 0.0,
            payoff_possible: true,
        };
    }

    let r = monthly_rate(annual_rate_pct);
    let before_last = f64::from(months - 1);
    let balance_before_last = if r == 0.0 {
        principal - monthly_payment * before_last
    } else {
        let growth = (1.0 + r).powf(before_last);
        principal * growth - monthly_payment * (growth - 1.0) / r
    };
    let last_payment = (balance_before_last * (1.0 + r)).clamp(0.0, monthly_payment);
    let paid = monthly_payment * before_last + last_payment;
    PayoffEstimate {
        months,
        total_paid: round_cents(paid),
        total_interest: round_cents((paid - principal).max(0.0)),
        payoff_possible: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_interest_divides_evenly() {
        assert_eq!(months_to_payoff(1000.0, 0.0, 100.0), 10);
        assert_eq!(months_to_payoff(1001.0, 0.0, 100.0), 11);
    }

    #[test]
    fn payment_at_or_below_interest_never_pays_off() {
        // 12 % APR on 1000 accrues exactly 10 per month
        assert_eq!(months_to_payoff(1000.0, 12.0, 10.0), NEVER_PAID_OFF_MONTHS);
        assert_eq!(months_to_payoff(1000.0, 12.0, 5.0), NEVER_PAID_OFF_MONTHS);
        assert_eq!(months_to_payoff(1000.0, 12.0, 0.0), NEVER_PAID_OFF_MONTHS);
    }

    #[test]
    fn standard_amortization_matches_known_value() {
        // 5000 at 18 % APR paying 200/month takes 32 months
        assert_eq!(months_to_payoff(5000.0, 18.0, 200.0), 32);
    }

    #[test]
    fn nothing_owed_is_zero_months() {
        assert_eq!(months_to_payoff(0.0, 20.0, 100.0), 0);
        assert_eq!(months_to_payoff(-5.0, 20.0, 100.0), 0);
    }

    #[test]
    fn schedule_reports_interest() {
        let estimate = payoff_schedule(1200.0, 0.0, 100.0);
        assert_eq!(estimate.months, 12);
        assert_eq!(estimate.total_paid, 1200.0);
        assert_eq!(estimate.total_interest, 0.0);

        let estimate = payoff_schedule(5000.0, 18.0, 200.0);
        assert!(estimate.payoff_possible);
        assert!(estimate.total_interest > 0.0);
        assert!(estimate.total_paid < 200.0 * 32.0 + 0.01);

        let stuck = payoff_schedule(1000.0, 24.0, 10.0);
        assert!(!stuck.payoff_possible);
        assert_eq!(stuck.months, NEVER_PAID_OFF_MONTHS);
    }

    #[test]
    fn long_finite_payoffs_are_not_the_sentinel() {
        assert_eq!(months_to_payoff(10_000.0, 0.0, 10.0), 1000);
        let estimate = payoff_schedule(10_000.0, 0.0, 10.0);
        assert!(estimate.payoff_possible);
        assert_eq!(estimate.months, 1000);
        assert_eq!(estimate.total_paid, 10_000.0);

        // 1 % a month on 10 000 is 100, so 100.001 barely dents it
        let slow = months_to_payoff(10_000.0, 12.0, 100.001);
        assert!(slow > NEVER_PAID_OFF_MONTHS);
        assert!(payoff_schedule(10_000.0, 12.0, 100.001).payoff_possible);
    }

    #[test]
    fn final_partial_payment_is_exact() {
        // 250 at 0 % paying 100: 100 + 100 + 50
        let estimate = payoff_schedule(250.0, 0.0, 100.0);
        assert_eq!(estimate.months, 3);
        assert_eq!(estimate.total_paid, 250.0);
    }

    proptest! {
        #[test]
        fn larger_payments_never_take_longer(
            principal in 100.0f64..50_000.0,
            rate in 0.0f64..40.0,
            payment in 10.0f64..5_000.0,
            extra in 0.0f64..1_000.0,
        ) {
            prop_assume!(payment_covers_interest(principal, rate, payment));
            let slow = months_to_payoff(principal, rate, payment);
            let fast = months_to_payoff(principal, rate, payment + extra);
            prop_assert!(fast <= slow);
        }

        #[test]
        fn sentinel_exactly_when_payment_covers_no_principal(
            principal in 100.0f64..50_000.0,
            rate in 0.1f64..40.0,
            payment in 1.0f64..5_000.0,
        ) {
            let months = months_to_payoff(principal, rate, payment);
            let interest = principal * (rate / 12.0 / 100.0);
            let estimate = payoff_schedule(principal, rate, payment);
            if payment <= interest {
                prop_assert_eq!(months, NEVER_PAID_OFF_MONTHS);
                prop_assert!(!estimate.payoff_possible);
            } else {
                prop_assert!(months >= 1);
                prop_assert!(estimate.payoff_possible);
            }
        }
    }
}
