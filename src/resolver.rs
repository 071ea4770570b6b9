//! Dub resolution.
//!
//! Turns the schedule site's signals for one title into a [`DubState`] and
//! commits it to the cache. Nothing is written unless every step succeeded,
//! so a failed resolution leaves the previous record as it was.

use crate::cache::DubCache;
use crate::dispatcher::Clock;
use crate::error::ResolveError;
use crate::models::{DubRecord, DubState, DubUpsert, Title, TitleId};
use crate::upstream::{ScheduleCandidate, ScheduleSource, parse_dub_marker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Resolves titles against the schedule site, at most one at a time per
/// title.
pub struct Resolver {
    schedule: Arc<dyn ScheduleSource>,
    cache: Arc<DubCache>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<TitleId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Resolver {
    pub fn new(
        schedule: Arc<dyn ScheduleSource>,
        cache: Arc<DubCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedule,
            cache,
            clock,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the dub status of `title` and upserts the result.
    ///
    /// Concurrent calls for the same title id run one after another.
    pub async fn resolve(&self, title: &Title) -> Result<DubRecord, ResolveError> {
        let gate = self.gate_for(title.id);
        let result = {
            let _guard = gate.lock().await;
            self.resolve_exclusive(title).await
        };
        self.release_gate(title.id, &gate);

        if let Err(e) = &result {
            warn!(title_id = title.id, error = %e, "dub resolution failed");
        }
        result
    }

    async fn resolve_exclusive(&self, title: &Title) -> Result<DubRecord, ResolveError> {
        let candidates = self.schedule.search(title.id).await?;
        let candidate = select_candidate(title, &candidates)?;
        let total = candidate.episode_count().or(title.episodes.filter(|n| *n > 0));

        let state = if !candidate.has_dub() {
            DubState::no_dub(total.unwrap_or(1))
        } else if title.status.is_finished() {
            DubState::complete(total.unwrap_or(1))
        } else {
            let html = self.schedule.title_page(&candidate.route).await?;
            match parse_dub_marker(&html) {
                Some(marker) => DubState::releasing(
                    marker.episode,
                    total.unwrap_or(marker.episode),
                    marker.air_time,
                ),
                None => {
                    // Known tradeoff: a dub that simply isn't scheduled yet
                    // also lands here and is reported complete.
                    warn!(
                        title_id = title.id,
                        slug = %candidate.route,
                        "no next dub episode on the schedule page, assuming the dub is complete"
                    );
                    DubState::complete(total.unwrap_or(1))
                }
            }
        };
        debug_assert!(state.is_consistent(), "inconsistent dub state {state:?}");

        let record = self
            .cache
            .upsert(DubUpsert {
                title_id: title.id,
                name: title.name.clone(),
                schedule_slug: candidate.route.clone(),
                cover_image: title.cover_image.clone(),
                release_status: title.status,
                state,
                resolved_at: self.clock.now(),
            })
            .await?;

        info!(
            title_id = title.id,
            has_dub = record.state.has_dub,
            releasing = record.state.is_releasing,
            dubbed = record.state.dubbed_episodes,
            total = record.state.total_episodes,
            "resolved dub status"
        );
        Ok(record)
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<TitleId, Arc<tokio::sync::Mutex<()>>>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn gate_for(&self, title_id: TitleId) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_map().entry(title_id).or_default().clone()
    }

    /// Drops the gate once nobody else holds or waits on it. Clones are only
    /// taken under the map lock, so the count can't grow while we look.
    fn release_gate(&self, title_id: TitleId, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.lock_map();
        if Arc::strong_count(gate) <= 2 {
            map.remove(&title_id);
        }
    }
}

/// Picks the schedule entry describing `title`.
///
/// A single candidate is taken as is. Among several, the first whose episode
/// count is at least the title's count minus one wins, since the two sites
/// are often one episode apart.
pub fn select_candidate<'a>(
    title: &Title,
    candidates: &'a [ScheduleCandidate],
) -> Result<&'a ScheduleCandidate, ResolveError> {
    let ambiguous = || ResolveError::Ambiguous {
        title_id: title.id,
        candidates: candidates.len(),
    };

    match candidates {
        [] => Err(ResolveError::NotFound(title.id)),
        [only] => Ok(only),
        many => {
            let expected = title.episodes.filter(|n| *n > 0).ok_or_else(ambiguous)?;
            let picked = many
                .iter()
                .find(|c| c.episode_count().is_some_and(|n| n + 1 >= expected))
                .ok_or_else(ambiguous)?;
            debug!(title_id = title.id, route = %picked.route, "picked schedule entry");
            Ok(picked)
        }
    }
}
