//! The display surface boundary.
//!
//! Flows never talk to a screen. They push state through [`DisplaySurface`]
//! and a presentation layer decides what that means: a window, a terminal,
//! or the in-memory recorder used by tests and smoke runs.
//!
//! Implementations MUST NOT:
//! - Call back into flows from inside a render method
//! - Block for longer than a paint

use std::sync::{Arc, Mutex, MutexGuard};

use crate::confirm::PromptView;
use crate::enroll::EnrollmentView;
use crate::frame::FramePayload;
use crate::roster::RosterView;
use crate::source::CameraStatus;
use crate::stability::IndicatorState;

/// Everything the kiosk can show. One implementation per presentation.
pub trait DisplaySurface: Send {
    /// Sizes the drawing overlay to the displayed source's on-screen box.
    /// Called immediately before a paint so boxes stay pixel-aligned.
    fn resize_overlay(&mut self, width: u32, height: u32);

    /// Paints an annotated frame that has already survived a decode.
    fn paint_processed_frame(&mut self, payload: &FramePayload, width: u32, height: u32);

    /// Updates the hold-still indicator.
    fn render_stability(&mut self, indicator: &IndicatorState);

    /// Shows, updates or closes (`None`) the confirmation prompt.
    fn render_prompt(&mut self, prompt: Option<&PromptView>);

    /// Redraws the enrollment panel.
    fn render_enrollment(&mut self, view: &EnrollmentView);

    /// Redraws the registered-people panel.
    fn render_roster(&mut self, view: &RosterView);

    /// Reports the camera lifecycle (connecting, ready, failed).
    fn show_camera_status(&mut self, status: &CameraStatus);

    /// Leaves the current screen for the given path.
    fn navigate(&mut self, path: &str);
}

/// Shared handle the flows hold. The mutex serializes renders with user
/// actions that run on other threads.
pub type SharedSurface = Arc<Mutex<dyn DisplaySurface>>;

/// Wraps a surface for sharing across the flows.
pub fn shared<S: DisplaySurface + 'static>(surface: S) -> SharedSurface {
    Arc::new(Mutex::new(surface))
}

/// Locks a shared surface, recovering the guard if a panicking thread
/// poisoned it.
pub fn lock(surface: &SharedSurface) -> MutexGuard<'_, dyn DisplaySurface + 'static> {
    surface.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// -------------------- MemorySurface --------------------

#[derive(Debug)]
struct SurfaceState {
    overlay_size: Option<(u32, u32)>,
    frames_painted: u64,
    last_frame: Option<(FramePayload, u32, u32)>,
    stability: IndicatorState,
    prompt: Option<PromptView>,
    enrollment: Option<EnrollmentView>,
    roster: Option<RosterView>,
    camera_statuses: Vec<CameraStatus>,
    navigations: Vec<String>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            overlay_size: None,
            frames_painted: 0,
            last_frame: None,
            stability: IndicatorState::hidden(),
            prompt: None,
            enrollment: None,
            roster: None,
            camera_statuses: Vec::new(),
            navigations: Vec::new(),
        }
    }
}

/// Surface that records everything it is told. Clones share the same
/// recording, so a test can keep one handle and give the other to a flow.
#[derive(Clone, Debug, Default)]
pub struct MemorySurface {
    inner: Arc<Mutex<SurfaceState>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn overlay_size(&self) -> Option<(u32, u32)> {
        self.state().overlay_size
    }

    pub fn frames_painted(&self) -> u64 {
        self.state().frames_painted
    }

    pub fn last_frame(&self) -> Option<(FramePayload, u32, u32)> {
        self.state().last_frame.clone()
    }

    pub fn stability(&self) -> IndicatorState {
        self.state().stability.clone()
    }

    pub fn prompt(&self) -> Option<PromptView> {
        self.state().prompt.clone()
    }

    pub fn enrollment(&self) -> Option<EnrollmentView> {
        self.state().enrollment.clone()
    }

    pub fn roster(&self) -> Option<RosterView> {
        self.state().roster.clone()
    }

    pub fn camera_statuses(&self) -> Vec<CameraStatus> {
        self.state().camera_statuses.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }
}

impl DisplaySurface for MemorySurface {
    fn resize_overlay(&mut self, width: u32, height: u32) {
        self.state().overlay_size = Some((width, height));
    }

    fn paint_processed_frame(&mut self, payload: &FramePayload, width: u32, height: u32) {
        let mut state = self.state();
        state.frames_painted += 1;
        state.last_frame = Some((payload.clone(), width, height));
    }

    fn render_stability(&mut self, indicator: &IndicatorState) {
        self.state().stability = indicator.clone();
    }

    fn render_prompt(&mut self, prompt: Option<&PromptView>) {
        self.state().prompt = prompt.cloned();
    }

    fn render_enrollment(&mut self, view: &EnrollmentView) {
        self.state().enrollment = Some(view.clone());
    }

    fn render_roster(&mut self, view: &RosterView) {
        self.state().roster = Some(view.clone());
    }

    fn show_camera_status(&mut self, status: &CameraStatus) {
        self.state().camera_statuses.push(status.clone());
    }

    fn navigate(&mut self, path: &str) {
        self.state().navigations.push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn clones_share_one_recording() -> Result<()> {
        let recorder = MemorySurface::new();
        let surface = shared(recorder.clone());
        {
            let mut guard = lock(&surface);
            guard.resize_overlay(320, 240);
            guard.navigate("/espcam");
            guard.render_stability(&IndicatorState {
                visible: true,
                percent: 40,
                label: Some("Mantenha-se parado...".to_string()),
            });
        }
        assert_eq!(recorder.overlay_size(), Some((320, 240)));
        assert_eq!(recorder.navigations(), vec!["/espcam".to_string()]);
        assert!(recorder.stability().visible);
        assert_eq!(recorder.frames_painted(), 0);
        Ok(())
    }
}
