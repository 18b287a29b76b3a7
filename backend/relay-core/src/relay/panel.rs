use crate::proto::ErrorCode;

/// Visibility of the UI surface a relay injects into its page.
///
/// Driven only by the error code of RPC responses, never by payload shape.
#[derive(Debug, Default)]
pub struct PanelState {
    visible: bool,
}

impl PanelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Classify a response. Returns the new visibility when it changed.
    ///
    /// - `UNINITIALIZED`: connection unavailable, hide
    /// - no error: normal response, show
    /// - any other error: no effect
    pub fn on_response(&mut self, err: Option<&ErrorCode>) -> Option<bool> {
        let next = match err {
            None => true,
            Some(code) if code.is_uninitialized() => false,
            Some(_) => return None,
        };

        if next == self.visible {
            return None;
        }
        self.visible = next;
        Some(next)
    }
}
