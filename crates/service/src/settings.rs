use chrono::NaiveTime;
use model::TransitionPolicy;
use rust_decimal::Decimal;

/// Tunables of the business rules, normally filled from `AppConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Flat tax rate applied to the subtotal (`0.10` is 10%).
    pub tax_rate: Decimal,
    pub transition_policy: TransitionPolicy,
    pub business_hours_start: NaiveTime,
    pub business_hours_end: NaiveTime,
    /// Granularity of enumerated appointment slots.
    pub slot_step_minutes: u32,
    /// Sender address for outgoing email.
    pub mail_from: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(10, 2),
            transition_policy: TransitionPolicy::Strict,
            business_hours_start: NaiveTime::from_hms_opt(9, 0, 0).expect("09:00 is a valid time"),
            business_hours_end: NaiveTime::from_hms_opt(17, 0, 0).expect("17:00 is a valid time"),
            slot_step_minutes: 30,
            mail_from: "no-reply@marketplace.local".to_string(),
        }
    }
}
