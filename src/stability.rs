//! Stability indicator projection.
//!
//! The backend attaches stability hints to recognition replies while it
//! tracks a candidate face. The kiosk turns the latest hint into indicator
//! state: a fill bar and a hold-still label. This is a pure projection; no
//! history is kept and a missing payload simply hides the indicator.

use serde::{Deserialize, Serialize};

/// Stability hints as they appear on the wire.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StabilityPayload {
    /// Whether the backend is currently tracking a candidate.
    #[serde(default)]
    pub tracking: bool,
    /// Hold progress in `[0, 1]`. Values outside the range are clamped.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Seconds of holding still left before the detection fires.
    #[serde(default, rename = "secondsLeft")]
    pub seconds_left: Option<f64>,
    /// The configured hold window.
    #[serde(default, rename = "stableSeconds")]
    pub stable_seconds: Option<f64>,
    /// Faces seen in the submitted frame.
    #[serde(default, rename = "facesDetected")]
    pub faces_detected: Option<u32>,
    /// Whether this candidate is still inside the re-detection cooldown.
    #[serde(default, rename = "cooldownActive")]
    pub cooldown_active: Option<bool>,
}

/// What the indicator should show right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndicatorState {
    pub visible: bool,
    /// Fill percentage, 0-100.
    pub percent: u8,
    pub label: Option<String>,
}

impl IndicatorState {
    pub fn hidden() -> Self {
        Self {
            visible: false,
            percent: 0,
            label: None,
        }
    }
}

/// Projects the latest payload onto the indicator. `None` or a non-tracking
/// payload hides it and resets the fill.
pub fn project(payload: Option<&StabilityPayload>) -> IndicatorState {
    let Some(ui) = payload else {
        return IndicatorState::hidden();
    };
    if !ui.tracking {
        return IndicatorState::hidden();
    }
    let progress = ui.progress.unwrap_or(0.0);
    let percent = (progress.clamp(0.0, 1.0) * 100.0).round() as u8;
    let label = match ui.seconds_left {
        Some(secs) => format!("Mantenha-se parado por {:.1}s", secs),
        None => "Mantenha-se parado...".to_string(),
    };
    IndicatorState {
        visible: true,
        percent,
        label: Some(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn tracking(progress: f64, seconds_left: Option<f64>) -> StabilityPayload {
        StabilityPayload {
            tracking: true,
            progress: Some(progress),
            seconds_left,
            ..StabilityPayload::default()
        }
    }

    #[test]
    fn missing_payload_hides_indicator() {
        assert_eq!(project(None), IndicatorState::hidden());
    }

    #[test]
    fn non_tracking_payload_hides_and_resets_fill() {
        let ui = StabilityPayload {
            tracking: false,
            progress: Some(0.8),
            ..StabilityPayload::default()
        };
        let state = project(Some(&ui));
        assert!(!state.visible);
        assert_eq!(state.percent, 0);
        assert!(state.label.is_none());
    }

    #[test]
    fn progress_is_clamped_and_rounded() {
        assert_eq!(project(Some(&tracking(0.5, None))).percent, 50);
        assert_eq!(project(Some(&tracking(1.7, None))).percent, 100);
        assert_eq!(project(Some(&tracking(-0.3, None))).percent, 0);
        assert_eq!(project(Some(&tracking(0.424, None))).percent, 42);
    }

    #[test]
    fn label_prefers_seconds_left() {
        let with = project(Some(&tracking(0.4, Some(1.8))));
        assert_eq!(with.label.as_deref(), Some("Mantenha-se parado por 1.8s"));

        // Zero seconds still shows the countdown form.
        let zero = project(Some(&tracking(1.0, Some(0.0))));
        assert_eq!(zero.label.as_deref(), Some("Mantenha-se parado por 0.0s"));

        let without = project(Some(&tracking(0.4, None)));
        assert_eq!(without.label.as_deref(), Some("Mantenha-se parado..."));
    }

    #[test]
    fn missing_progress_counts_as_zero() {
        let ui = StabilityPayload {
            tracking: true,
            ..StabilityPayload::default()
        };
        let state = project(Some(&ui));
        assert!(state.visible);
        assert_eq!(state.percent, 0);
    }

    #[test]
    fn wire_names_are_camel_case() -> Result<()> {
        let ui: StabilityPayload = serde_json::from_str(
            r#"{"tracking": true, "progress": 0.25, "secondsLeft": 2.2,
                "stableSeconds": 3.0, "facesDetected": 2, "cooldownActive": true}"#,
        )?;
        assert_eq!(ui.faces_detected, Some(2));
        assert_eq!(ui.cooldown_active, Some(true));
        assert!((ui.stable_seconds.expect("stable") - 3.0).abs() < 1e-9);

        let empty: StabilityPayload = serde_json::from_str("{}")?;
        assert!(!empty.tracking);
        assert!(empty.progress.is_none());
        Ok(())
    }
}
