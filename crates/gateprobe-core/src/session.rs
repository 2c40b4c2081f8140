use crate::engine::SuiteRun;

/// Which assessment the host dialog is showing: the in-memory live run or
/// one reconstructed history group. Starting a new suite always drops any
/// pending historical selection so results from different runs can never be
/// rendered together.
#[derive(Debug, Default)]
pub struct ProbeSession {
    live: Option<SuiteRun>,
    selected_group: Option<String>,
}

impl ProbeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_suite(&mut self, run: SuiteRun) -> &mut SuiteRun {
        self.selected_group = None;
        self.live.insert(run)
    }

    pub fn live(&self) -> Option<&SuiteRun> {
        self.live.as_ref()
    }

    pub fn live_mut(&mut self) -> Option<&mut SuiteRun> {
        self.live.as_mut()
    }

    /// Switches the dialog to a reconstructed group by its group key.
    pub fn select_group(&mut self, key: impl Into<String>) {
        self.selected_group = Some(key.into());
    }

    pub fn selected_group(&self) -> Option<&str> {
        self.selected_group.as_deref()
    }

    pub fn show_live(&mut self) {
        self.selected_group = None;
    }

    /// Dialog closed: the live run is memory-only and dies with it.
    pub fn clear(&mut self) {
        self.live = None;
        self.selected_group = None;
    }
}
