//! Rebalance scheduling.
//!
//! A day-granularity state machine evaluated once per trading day. It moves
//! from `WarmingUp` to `Active` once the lookback is satisfied and to
//! `Finished` when the run ends.

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarRule {
    /// First trading day of each ISO week.
    Weekly,
    /// First trading day of each month.
    Monthly,
    /// First trading day of each calendar quarter.
    Quarterly,
}

impl CalendarRule {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "weekly" => Some(CalendarRule::Weekly),
            "monthly" => Some(CalendarRule::Monthly),
            "quarterly" => Some(CalendarRule::Quarterly),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CalendarRule::Weekly => "weekly",
            CalendarRule::Monthly => "monthly",
            CalendarRule::Quarterly => "quarterly",
        }
    }

    fn period(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            CalendarRule::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            CalendarRule::Monthly => (date.year(), date.month()),
            CalendarRule::Quarterly => (date.year(), (date.month() - 1) / 3),
        }
    }

    /// Whether `date` opens a new period relative to the previous trading day.
    pub fn is_first_trading_day(&self, previous: Option<NaiveDate>, date: NaiveDate) -> bool {
        match previous {
            None => true,
            Some(prev) => self.period(prev) != self.period(date),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RebalanceMode {
    Periodic(CalendarRule),
    /// Fires when any weight has drifted more than `threshold` from its target.
    Adaptive { threshold: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    WarmingUp,
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RebalanceTrigger {
    /// No target on record yet.
    Initial,
    Scheduled,
    Drift { max_drift: f64 },
}

impl RebalanceTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            RebalanceTrigger::Initial => "initial",
            RebalanceTrigger::Scheduled => "scheduled",
            RebalanceTrigger::Drift { .. } => "drift",
        }
    }
}

/// What the scheduler sees on one trading day.
#[derive(Debug, Clone, Copy)]
pub struct DayContext<'a> {
    pub date: NaiveDate,
    /// Previous date in the price table, including pre-start history.
    pub previous_date: Option<NaiveDate>,
    /// Returns available strictly before `date`.
    pub available_returns: usize,
    /// Post-mark weights for `date`.
    pub current_weights: &'a [f64],
}

#[derive(Debug, Clone)]
pub struct RebalanceScheduler {
    mode: RebalanceMode,
    lookback: usize,
    state: SchedulerState,
    last_target: Option<Vec<f64>>,
    last_evaluated: Option<NaiveDate>,
}

impl RebalanceScheduler {
    pub fn new(mode: RebalanceMode, lookback: usize) -> Self {
        Self {
            mode,
            lookback,
            state: SchedulerState::WarmingUp,
            last_target: None,
            last_evaluated: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn mode(&self) -> RebalanceMode {
        self.mode
    }

    pub fn last_target(&self) -> Option<&[f64]> {
        self.last_target.as_deref()
    }

    /// Evaluate one trading day. Returns at most one trigger per date.
    pub fn evaluate(&mut self, day: &DayContext<'_>) -> Option<RebalanceTrigger> {
        if self.state == SchedulerState::Finished {
            return None;
        }
        if self.last_evaluated == Some(day.date) {
            return None;
        }
        self.last_evaluated = Some(day.date);

        if day.available_returns < self.lookback {
            return None;
        }
        self.state = SchedulerState::Active;

        let Some(target) = self.last_target.as_deref() else {
            return Some(RebalanceTrigger::Initial);
        };

        match self.mode {
            RebalanceMode::Periodic(rule) => rule
                .is_first_trading_day(day.previous_date, day.date)
                .then_some(RebalanceTrigger::Scheduled),
            RebalanceMode::Adaptive { threshold } => {
                let max_drift = max_drift(day.current_weights, target);
                (max_drift > threshold).then_some(RebalanceTrigger::Drift { max_drift })
            }
        }
    }

    /// Remember the weights the ledger now holds as the drift reference.
    pub fn record_target(&mut self, weights: &[f64]) {
        self.last_target = Some(weights.to_vec());
    }

    pub fn finish(&mut self) {
        self.state = SchedulerState::Finished;
    }
}

/// `max_i |current_i − target_i|`.
pub fn max_drift(current: &[f64], target: &[f64]) -> f64 {
    current
        .iter()
        .zip(target)
        .map(|(c, t)| (c - t).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day<'a>(
        date: NaiveDate,
        previous_date: Option<NaiveDate>,
        available_returns: usize,
        current_weights: &'a [f64],
    ) -> DayContext<'a> {
        DayContext {
            date,
            previous_date,
            available_returns,
            current_weights,
        }
    }

    #[test]
    fn stays_warming_up_until_lookback_met() {
        let mut s = RebalanceScheduler::new(RebalanceMode::Adaptive { threshold: 0.05 }, 5);
        let w = [0.5, 0.5];
        assert_eq!(s.evaluate(&day(date(2024, 1, 8), None, 4, &w)), None);
        assert_eq!(s.state(), SchedulerState::WarmingUp);

        let trigger = s.evaluate(&day(date(2024, 1, 9), Some(date(2024, 1, 8)), 5, &w));
        assert_eq!(trigger, Some(RebalanceTrigger::Initial));
        assert_eq!(s.state(), SchedulerState::Active);
    }

    #[test]
    fn initial_trigger_repeats_until_target_recorded() {
        let mut s = RebalanceScheduler::new(RebalanceMode::Periodic(CalendarRule::Monthly), 1);
        let w = [0.0, 0.0];
        assert_eq!(
            s.evaluate(&day(date(2024, 1, 10), Some(date(2024, 1, 9)), 3, &w)),
            Some(RebalanceTrigger::Initial)
        );
        assert_eq!(
            s.evaluate(&day(date(2024, 1, 11), Some(date(2024, 1, 10)), 4, &w)),
            Some(RebalanceTrigger::Initial)
        );
        s.record_target(&[0.5, 0.5]);
        assert_eq!(
            s.evaluate(&day(date(2024, 1, 12), Some(date(2024, 1, 11)), 5, &w)),
            None
        );
    }

    #[test]
    fn one_trigger_per_date() {
        let mut s = RebalanceScheduler::new(RebalanceMode::Adaptive { threshold: 0.05 }, 1);
        let w = [0.5, 0.5];
        let ctx = day(date(2024, 2, 1), Some(date(2024, 1, 31)), 10, &w);
        assert!(s.evaluate(&ctx).is_some());
        assert!(s.evaluate(&ctx).is_none());
    }

    #[test]
    fn monthly_fires_on_first_trading_day() {
        let mut s = RebalanceScheduler::new(RebalanceMode::Periodic(CalendarRule::Monthly), 1);
        s.record_target(&[0.5, 0.5]);
        let w = [0.5, 0.5];
        assert_eq!(
            s.evaluate(&day(date(2024, 1, 31), Some(date(2024, 1, 30)), 10, &w)),
            None
        );
        assert_eq!(
            s.evaluate(&day(date(2024, 2, 1), Some(date(2024, 1, 31)), 11, &w)),
            Some(RebalanceTrigger::Scheduled)
        );
        assert_eq!(
            s.evaluate(&day(date(2024, 2, 2), Some(date(2024, 2, 1)), 12, &w)),
            None
        );
    }

    #[test]
    fn weekly_rule_uses_iso_weeks() {
        let rule = CalendarRule::Weekly;
        // Friday 2024-01-05 -> Monday 2024-01-08
        assert!(rule.is_first_trading_day(Some(date(2024, 1, 5)), date(2024, 1, 8)));
        assert!(!rule.is_first_trading_day(Some(date(2024, 1, 8)), date(2024, 1, 9)));
        // holiday Monday: Tuesday opens the week
        assert!(rule.is_first_trading_day(Some(date(2024, 1, 12)), date(2024, 1, 16)));
        // across the year boundary
        assert!(rule.is_first_trading_day(Some(date(2023, 12, 29)), date(2024, 1, 2)));
    }

    #[test]
    fn quarterly_rule() {
        let rule = CalendarRule::Quarterly;
        assert!(rule.is_first_trading_day(Some(date(2024, 3, 28)), date(2024, 4, 1)));
        assert!(!rule.is_first_trading_day(Some(date(2024, 4, 30)), date(2024, 5, 1)));
        assert!(rule.is_first_trading_day(None, date(2024, 5, 1)));
    }

    #[test]
    fn adaptive_threshold_is_strict() {
        let mut s = RebalanceScheduler::new(RebalanceMode::Adaptive { threshold: 0.25 }, 1);
        s.record_target(&[0.5, 0.5]);
        assert_eq!(
            s.evaluate(&day(date(2024, 1, 2), None, 5, &[0.75, 0.25])),
            None
        );
        match s.evaluate(&day(date(2024, 1, 3), Some(date(2024, 1, 2)), 6, &[0.76, 0.24])) {
            Some(RebalanceTrigger::Drift { max_drift }) => {
                assert!((max_drift - 0.26).abs() < 1e-12)
            }
            other => panic!("expected drift trigger, got {other:?}"),
        }
    }

    #[test]
    fn finished_never_fires() {
        let mut s = RebalanceScheduler::new(RebalanceMode::Adaptive { threshold: 0.05 }, 1);
        s.finish();
        assert_eq!(s.state(), SchedulerState::Finished);
        assert_eq!(s.evaluate(&day(date(2024, 1, 2), None, 5, &[1.0])), None);
    }

    #[test]
    fn calendar_rule_parse() {
        assert_eq!(CalendarRule::parse("Weekly"), Some(CalendarRule::Weekly));
        assert_eq!(CalendarRule::parse("quarterly"), Some(CalendarRule::Quarterly));
        assert_eq!(CalendarRule::parse("daily"), None);
    }
}
