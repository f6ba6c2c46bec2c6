//! Performance statistics and cumulative profit curves over closed positions.

use std::collections::BTreeMap;
use std::fmt;

use goldmine_core::{ClosedPosition, FillTime, PositionFilter};
use itertools::Itertools;
use serde::Serialize;

/// Aggregate statistics for a set of closed positions.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Share of decided (non-zero profit) trades that won, in percent.
    pub win_rate_pct: f64,
    /// Gross winning profit over gross losing profit.
    pub profit_factor: f64,
    pub total_profit: f64,
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Closed Position Summary")?;
        writeln!(f, "------------------------------------")?;
        writeln!(f, "{:<25} {}", "Total Trades", self.total_trades)?;
        writeln!(f, "{:<25} {}", "Wins", self.wins)?;
        writeln!(f, "{:<25} {}", "Losses", self.losses)?;
        writeln!(f, "{:<25} {:.2}%", "Win Rate", self.win_rate_pct)?;
        writeln!(f, "{:<25} {:.4}", "Profit Factor", self.profit_factor)?;
        writeln!(f, "{:<25} {:.2}", "Total Profit", self.total_profit)?;
        writeln!(f, "------------------------------------")
    }
}

/// One step of a cumulative profit series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfitPoint {
    pub exit_time: FillTime,
    pub security: String,
    pub strategy: String,
    pub profit: f64,
    /// Running total including this position.
    pub cumulative: f64,
}

pub struct Reporter {
    positions: Vec<ClosedPosition>,
}

impl Reporter {
    /// Keep only the positions accepted by `filter`.
    pub fn new(positions: Vec<ClosedPosition>, filter: &PositionFilter) -> Self {
        let positions = positions
            .into_iter()
            .filter(|position| filter.matches(position))
            .collect();
        Self { positions }
    }

    pub fn positions(&self) -> &[ClosedPosition] {
        &self.positions
    }

    pub fn summary(&self) -> PerformanceSummary {
        let total_trades = self.positions.len();
        let wins = self.positions.iter().filter(|p| p.is_win()).count();
        let losses = self.positions.iter().filter(|p| p.is_loss()).count();
        let decided = wins + losses;
        let win_rate_pct = if decided > 0 {
            (wins as f64 / decided as f64) * 100.0
        } else {
            0.0
        };

        let gross_win: f64 = self
            .positions
            .iter()
            .filter(|p| p.is_win())
            .map(|p| p.profit)
            .sum();
        let gross_loss: f64 = self
            .positions
            .iter()
            .filter(|p| p.is_loss())
            .map(|p| p.profit)
            .sum();
        let profit_factor = if wins == 0 {
            0.0
        } else if losses == 0 {
            f64::INFINITY
        } else {
            gross_win / gross_loss.abs()
        };

        PerformanceSummary {
            total_trades,
            wins,
            losses,
            win_rate_pct,
            profit_factor,
            total_profit: self.positions.iter().map(|p| p.profit).sum(),
        }
    }

    /// Cumulative profit per account, each series ordered by exit time.
    pub fn profit_curves(&self) -> BTreeMap<String, Vec<ProfitPoint>> {
        self.positions
            .iter()
            .sorted_by_key(|p| p.exit_time)
            .into_group_map_by(|p| p.account.clone())
            .into_iter()
            .map(|(account, positions)| {
                let mut cumulative = 0.0;
                let points = positions
                    .into_iter()
                    .map(|p| {
                        cumulative += p.profit;
                        ProfitPoint {
                            exit_time: p.exit_time,
                            security: p.security.clone(),
                            strategy: p.strategy.clone(),
                            profit: p.profit,
                            cumulative,
                        }
                    })
                    .collect();
                (account, points)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldmine_core::Direction;

    fn position(account: &str, strategy: &str, exit: i64, profit: f64) -> ClosedPosition {
        ClosedPosition {
            account: account.into(),
            security: "bar".into(),
            strategy: strategy.into(),
            direction: Direction::Long,
            entry_time: FillTime {
                seconds: exit - 1,
                micros: 0,
            },
            exit_time: FillTime {
                seconds: exit,
                micros: 0,
            },
            profit,
            profit_currency: "RUB".into(),
            fill_ids: vec![],
        }
    }

    #[test]
    fn summary_counts_wins_losses_and_factor() {
        let reporter = Reporter::new(
            vec![
                position("a", "s", 1, 10.0),
                position("a", "s", 2, -4.0),
                position("a", "s", 3, 6.0),
                position("a", "s", 4, 0.0),
            ],
            &PositionFilter::default(),
        );
        let summary = reporter.summary();
        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert!((summary.win_rate_pct - 200.0 / 3.0).abs() < 1e-9);
        assert!((summary.profit_factor - 4.0).abs() < 1e-9);
        assert!((summary.total_profit - 12.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_edge_cases() {
        let empty = Reporter::new(vec![], &PositionFilter::default()).summary();
        assert_eq!(empty.total_trades, 0);
        assert_eq!(empty.win_rate_pct, 0.0);
        assert_eq!(empty.profit_factor, 0.0);

        let only_wins =
            Reporter::new(vec![position("a", "s", 1, 5.0)], &PositionFilter::default()).summary();
        assert!(only_wins.profit_factor.is_infinite());
        assert_eq!(only_wins.win_rate_pct, 100.0);

        let only_losses =
            Reporter::new(vec![position("a", "s", 1, -5.0)], &PositionFilter::default()).summary();
        assert_eq!(only_losses.profit_factor, 0.0);
        assert_eq!(only_losses.win_rate_pct, 0.0);
    }

    #[test]
    fn curves_accumulate_per_account_in_exit_order() {
        let reporter = Reporter::new(
            vec![
                position("b", "s", 5, 1.0),
                position("a", "s", 3, -2.0),
                position("a", "s", 1, 5.0),
                position("a", "s", 2, 1.5),
            ],
            &PositionFilter::default(),
        );
        let curves = reporter.profit_curves();
        assert_eq!(curves.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        let a: Vec<_> = curves["a"].iter().map(|p| p.cumulative).collect();
        assert_eq!(a, vec![5.0, 6.5, 4.5]);
        assert_eq!(curves["a"][0].exit_time.seconds, 1);
        assert_eq!(curves["b"][0].cumulative, 1.0);
    }

    #[test]
    fn filter_restricts_account_and_strategy() {
        let positions = vec![
            position("a", "s1", 1, 1.0),
            position("a", "s2", 2, 2.0),
            position("b", "s1", 3, 3.0),
        ];
        let filter = PositionFilter {
            account: Some("a".into()),
            strategy: Some("s1".into()),
        };
        let reporter = Reporter::new(positions, &filter);
        assert_eq!(reporter.positions().len(), 1);
        assert_eq!(reporter.summary().total_profit, 1.0);
    }

    #[test]
    fn summary_renders_fixed_width_table() {
        let summary = Reporter::new(vec![position("a", "s", 1, 2.5)], &PositionFilter::default())
            .summary();
        let text = summary.to_string();
        assert!(text.contains("Total Trades              1"));
        assert!(text.contains("Win Rate                  100.00%"));
        assert!(text.contains("Total Profit              2.50"));
    }
}
