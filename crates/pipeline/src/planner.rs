//! Query planning: splitting a date range into windows that each stay under
//! the search API's per-query result cap.

use tracing::{debug, warn};

use crate::{CountProbe, DateRange, EntityKind, QueryWindow, SearchConfig, SearchError};

/// The GitHub search API never returns more than this many results per query.
pub const SEARCH_RESULT_CAP: u64 = 1000;

/// How the planner sizes windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStrategy {
    /// Bisect windows until a count probe reports at most `cap` results, or
    /// the window is a single day.
    Probe { cap: u64 },
    /// Fixed-length windows of `days` days, no probing.
    FixedSpan { days: u64 },
}

impl Default for PlanStrategy {
    fn default() -> Self {
        Self::Probe {
            cap: SEARCH_RESULT_CAP,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryPlanner {
    strategy: PlanStrategy,
}

impl QueryPlanner {
    pub fn new(strategy: PlanStrategy) -> Self {
        Self { strategy }
    }

    /// Plans the windows for one entity kind, in chronological order.
    ///
    /// The returned windows are disjoint and together cover `config.range`
    /// exactly. Only [`SearchError::is_fatal`] probe errors abort planning; any
    /// other probe failure accepts the window as it is.
    pub async fn plan(
        &self,
        kind: EntityKind,
        config: &SearchConfig,
        keywords: &[String],
        probe: &mut dyn CountProbe,
    ) -> Result<Vec<QueryWindow>, SearchError> {
        if keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(SearchError::config("no search keywords to plan with"));
        }
        let template = QueryWindow::new(kind, config.range, config.language.as_deref(), keywords);

        match self.strategy {
            PlanStrategy::FixedSpan { days } => {
                if days == 0 {
                    return Err(SearchError::config("fixed window span must be at least one day"));
                }
                Ok(config
                    .range
                    .spans(days)
                    .into_iter()
                    .map(|range| template.with_range(range))
                    .collect())
            }
            PlanStrategy::Probe { cap } => bisect_until_under(cap, &template, probe).await,
        }
    }
}

async fn bisect_until_under(
    cap: u64,
    template: &QueryWindow,
    probe: &mut dyn CountProbe,
) -> Result<Vec<QueryWindow>, SearchError> {
    let mut windows = Vec::new();
    // LIFO stack; the left half is pushed last so output stays chronological.
    let mut pending: Vec<DateRange> = vec![template.range];

    while let Some(range) = pending.pop() {
        let window = template.with_range(range);
        let Some((left, right)) = range.bisect() else {
            windows.push(window);
            continue;
        };

        match probe.count(&window).await {
            Ok(count) if count <= cap => {
                debug!(window = %window, count, "window accepted");
                windows.push(window);
            }
            Ok(count) => {
                debug!(window = %window, count, cap, "window over cap; bisecting");
                pending.push(right);
                pending.push(left);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(window = %window, error = %e, "count probe failed; accepting window unsplit");
                windows.push(window);
            }
        }
    }

    Ok(windows)
}
