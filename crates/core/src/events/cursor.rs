//! Opaque page cursors.
//!
//! A cursor wraps the position of the last row a page returned: the event
//! version for trajectories, the audit row sequence for the audit ledger.
//! Positions only grow, so rows appended elsewhere never shift a page.

use crate::error::{StoreError, StoreResult};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorKind {
    Trajectory,
    Audit,
}

impl CursorKind {
    fn tag(self) -> &'static str {
        match self {
            CursorKind::Trajectory => "v",
            CursorKind::Audit => "a",
        }
    }
}

pub(crate) fn encode(kind: CursorKind, position: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{position}", kind.tag()))
}

/// Position after which the next page starts. `None` starts from the beginning.
pub(crate) fn decode(kind: CursorKind, cursor: Option<&str>) -> StoreResult<i64> {
    let Some(cursor) = cursor.filter(|c| !c.is_empty()) else {
        return Ok(0);
    };
    let invalid = || StoreError::Validation(format!("invalid cursor '{cursor}'"));
    let raw = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(raw).map_err(|_| invalid())?;
    let (tag, position) = text.split_once(':').ok_or_else(invalid)?;
    if tag != kind.tag() {
        return Err(invalid());
    }
    let position: i64 = position.parse().map_err(|_| invalid())?;
    if position < 0 {
        return Err(invalid());
    }
    Ok(position)
}
