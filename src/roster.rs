//! Registered-people panel.
//!
//! Fetches the roster from the backend and renders it. The panel always
//! renders something: rows when the fetch yields any, a placeholder
//! line when it is empty or the fetch failed.

use crate::backend::{BackendClient, RosterEntry};
use crate::display::{self, SharedSurface};

const EMPTY_PLACEHOLDER: &str = "Nenhuma pessoa registrada ainda";
const ERROR_PLACEHOLDER: &str = "Erro ao carregar";

/// What the surface renders for the roster panel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterView {
    pub rows: Vec<RosterEntry>,
    /// Set when there are no rows to show.
    pub placeholder: Option<String>,
}

impl RosterView {
    pub fn from_entries(rows: Vec<RosterEntry>) -> Self {
        if rows.is_empty() {
            Self {
                rows,
                placeholder: Some(EMPTY_PLACEHOLDER.to_string()),
            }
        } else {
            Self {
                rows,
                placeholder: None,
            }
        }
    }

    pub fn unavailable() -> Self {
        Self {
            rows: Vec::new(),
            placeholder: Some(ERROR_PLACEHOLDER.to_string()),
        }
    }
}

/// Fetches and renders the roster. A failed fetch still renders, with
/// the error placeholder.
pub fn refresh(client: &BackendClient, surface: &SharedSurface) -> RosterView {
    let view = match client.registered_people() {
        Ok(rows) => RosterView::from_entries(rows),
        Err(err) => {
            log::debug!("roster refresh failed: {:#}", err);
            RosterView::unavailable()
        }
    };
    display::lock(surface).render_roster(&view);
    view
}
