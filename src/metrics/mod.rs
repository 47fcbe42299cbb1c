pub mod calculator;
pub mod growth;
pub mod safe_math;

pub use calculator::{derive_metrics, MetricCalculator};
pub use growth::{growth_rate, yoy_growth_in_series, GrowthCalculator, YoyGrowth};
pub use safe_math::{safe_add, safe_div, safe_mul, safe_sub};
