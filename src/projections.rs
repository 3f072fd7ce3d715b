use tracing::debug;

use crate::error::ExtractError;
use crate::models::{ActivityType, Event, Session, SessionTable};

/// Trailing stages that must carry a score to form a session
const SCORED_COMPLETIONS: [&str; 2] = ["Quiz_complete", "Challenge_complete"];

/// Two events of one activity instance, in timestamp order.
/// `trailing` is `None` for the last event of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePair<'a> {
    pub leading: &'a Event,
    pub trailing: Option<&'a Event>,
}

impl StagePair<'_> {
    fn trailing_stage(&self) -> Option<&str> {
        self.trailing.and_then(|event| event.activity_stage.as_deref())
    }

    fn trailing_score(&self) -> Option<i64> {
        self.trailing.and_then(|event| event.score)
    }
}

/// Reconstruct sessions for one activity type.
///
/// `activity` must name one of `Quiz`, `Challenge` or `Video`.
pub fn extract(events: &[Event], activity: &str) -> Result<SessionTable, ExtractError> {
    let activity: ActivityType = activity.parse()?;
    extract_sessions(events, activity)
}

/// Reconstruct sessions for an already-validated activity type.
///
/// Filters to `activity`, orders by `(activity_id, timestamp)` keeping input
/// order on ties, pairs each event with its successor inside the same
/// activity instance and turns every valid pair into a [`Session`].
pub fn extract_sessions(events: &[Event], activity: ActivityType) -> Result<SessionTable, ExtractError> {
    let scorable = activity.is_scorable();

    let filtered = filter_activity_type(events, activity);
    let ordered = sort_events(filtered);
    let pairs = pair_adjacent(&ordered);
    let candidates = pairs.len();

    let mut pairs = remove_incomplete_pairs(pairs);
    if scorable {
        pairs = remove_unscored_completions(pairs);
    }

    let sessions = pairs
        .iter()
        .map(|pair| build_session(pair, scorable))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        activity = %activity,
        events = ordered.len(),
        candidates,
        sessions = sessions.len(),
        "extracted sessions"
    );

    Ok(SessionTable { activity, sessions })
}

/// Keep only events of the requested type
pub fn filter_activity_type(events: &[Event], activity: ActivityType) -> Vec<&Event> {
    events
        .iter()
        .filter(|event| event.activity_type == activity.as_str())
        .collect()
}

/// Stable sort by `(activity_id, timestamp)`
pub fn sort_events(mut events: Vec<&Event>) -> Vec<&Event> {
    events.sort_by_key(|event| (event.activity_id, event.timestamp));
    events
}

/// Pair each event with the next one of the same activity instance.
///
/// Expects `events` ordered by [`sort_events`]. Every group contributes one
/// pair per event, the last of which has no trailing event.
pub fn pair_adjacent<'a>(events: &[&'a Event]) -> Vec<StagePair<'a>> {
    let mut pairs = Vec::with_capacity(events.len());
    let mut group_start = 0;

    while group_start < events.len() {
        let activity_id = events[group_start].activity_id;
        let mut group_end = group_start + 1;
        while group_end < events.len() && events[group_end].activity_id == activity_id {
            group_end += 1;
        }

        for idx in group_start..group_end {
            let trailing = if idx + 1 < group_end { Some(events[idx + 1]) } else { None };
            pairs.push(StagePair {
                leading: events[idx],
                trailing,
            });
        }

        group_start = group_end;
    }

    pairs
}

/// Drop pairs with no trailing stage
pub fn remove_incomplete_pairs(pairs: Vec<StagePair<'_>>) -> Vec<StagePair<'_>> {
    pairs
        .into_iter()
        .filter(|pair| pair.trailing_stage().is_some())
        .collect()
}

/// Drop pairs ending in a completion that has no score
pub fn remove_unscored_completions(pairs: Vec<StagePair<'_>>) -> Vec<StagePair<'_>> {
    pairs
        .into_iter()
        .filter(|pair| {
            let completion = pair
                .trailing_stage()
                .is_some_and(|stage| SCORED_COMPLETIONS.contains(&stage));
            !(completion && pair.trailing_score().is_none())
        })
        .collect()
}

/// The part of `Quiz_complete` after the first separator
pub fn stage_status(activity_id: i64, stage: &str) -> Result<&str, ExtractError> {
    stage
        .split_once('_')
        .map(|(_, status)| status)
        .ok_or_else(|| ExtractError::MalformedStage {
            activity_id,
            stage: stage.to_string(),
        })
}

fn build_session(pair: &StagePair<'_>, scorable: bool) -> Result<Session, ExtractError> {
    let leading = pair.leading;
    // Incomplete pairs are gone by now, but keep the error path total.
    let Some(trailing) = pair.trailing else {
        return Err(ExtractError::MalformedStage {
            activity_id: leading.activity_id,
            stage: String::new(),
        });
    };
    let stage = trailing.activity_stage.as_deref().unwrap_or_default();
    let status = stage_status(leading.activity_id, stage)?;

    Ok(Session {
        activity_id: leading.activity_id,
        user_id: leading.user_id,
        start_timestamp: leading.timestamp,
        activity_duration: trailing.timestamp - leading.timestamp,
        status: status.to_string(),
        score: if scorable { trailing.score } else { None },
    })
}
