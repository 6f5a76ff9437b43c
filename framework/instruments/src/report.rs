mod category_table;
mod round_table;

use tabled::settings::Style;
use tabled::Table;

use crate::classify::RunStatistics;
use crate::report::category_table::CategoryRow;

pub use round_table::RoundRow;

/// Render the per-category breakdown of a driver run as a table.
pub fn render_category_summary(stats: &RunStatistics) -> String {
    let rows = stats
        .per_category
        .iter()
        .map(|c| CategoryRow {
            category: c.category.to_string(),
            total_samples: c.count,
            avg_time_ms: as_ms(c.duration_avg),
            min_time_ms: as_ms(c.duration_min),
            max_time_ms: as_ms(c.duration_max),
            total_duration_ms: as_ms(c.duration_total),
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    table.to_string()
}

/// Render one row per admission-gated round.
pub fn render_round_summary(rows: &[RoundRow]) -> String {
    let mut table = Table::new(rows);
    table.with(Style::modern());

    table.to_string()
}

fn as_ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
