//! Exposure notification decision.

use cwatch_types::store::ContactStore;
use cwatch_types::UnixMillis;
use serde::{Deserialize, Serialize};

use crate::Result;

/// What the notification collaborator needs to know.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureStatus {
    /// `last_seen` of the most recent potentially infectious observation.
    pub most_recent_exposure: Option<UnixMillis>,
    pub should_notify: bool,
}

/// Current exposure status.
///
/// Users who reported themselves sick are not notified of exposures.
pub fn exposure_status<S>(store: &S, user_reported_sick: bool) -> Result<ExposureStatus>
where
    S: ContactStore + ?Sized,
{
    let most_recent_exposure = store.most_recent_exposure()?.map(|obs| obs.last_seen);
    Ok(ExposureStatus {
        most_recent_exposure,
        should_notify: most_recent_exposure.is_some() && !user_reported_sick,
    })
}
