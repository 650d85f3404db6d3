//! Panel - the dockable view onto the shell session.
//!
//! The panel is presentation state only: toggling it never creates or
//! destroys the backing process. It is docked at the bottom of the
//! terminal, sized as a configured fraction of the available height,
//! and dedicated to session output while visible.

/// Bottom-docked panel geometry and visibility
pub struct Panel {
    /// Whether the panel is currently shown
    pub visible: bool,
    /// Whether keys are routed to the session
    pub focused: bool,
    /// Height as a fraction of the terminal height
    fraction: f32,
    /// Full terminal size
    cols: u16,
    rows: u16,
}

/// Rows reserved outside the panel: one host row minimum plus the
/// status bar
const RESERVED_ROWS: u16 = 2;

/// Smallest useful panel: border row plus two content rows
const MIN_HEIGHT: u16 = 3;

impl Panel {
    pub fn new(fraction: f32, cols: u16, rows: u16) -> Self {
        Self {
            visible: false,
            focused: false,
            fraction: fraction.clamp(0.1, 0.9),
            cols,
            rows,
        }
    }

    /// Toggle visibility; returns the new state.
    ///
    /// Hiding an already-hidden panel cannot happen through here (the
    /// visibility check is the branch itself), which keeps the close
    /// path idempotent.
    pub fn toggle(&mut self) -> bool {
        if self.visible {
            self.visible = false;
            self.focused = false;
        } else {
            self.visible = true;
            self.focused = true;
        }
        self.visible
    }

    pub fn set_fraction(&mut self, fraction: f32) {
        self.fraction = fraction.clamp(0.1, 0.9);
    }

    pub fn set_size(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Total panel height including the border row
    pub fn height(&self) -> u16 {
        let wanted = (self.fraction * self.rows as f32).round() as u16;
        wanted
            .max(MIN_HEIGHT)
            .min(self.rows.saturating_sub(RESERVED_ROWS))
    }

    /// Screen row of the panel's border line
    pub fn origin_row(&self) -> u16 {
        // Status bar occupies the last row
        self.rows.saturating_sub(1).saturating_sub(self.height())
    }

    /// Content area as (x, y, width, height)
    pub fn content_rect(&self) -> (u16, u16, u16, u16) {
        let height = self.height().saturating_sub(1);
        (0, self.origin_row() + 1, self.cols, height)
    }

    /// Pty dimensions for the content area
    pub fn content_size(&self) -> (u16, u16) {
        let (_, _, w, h) = self.content_rect();
        (w.max(1), h.max(1))
    }

    /// Check if a screen position is inside the panel (border included)
    pub fn contains(&self, _col: u16, row: u16) -> bool {
        self.visible && row >= self.origin_row() && row < self.rows.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_alternates() {
        let mut panel = Panel::new(0.35, 80, 40);
        assert!(!panel.visible);

        // Odd toggle counts leave it visible, even counts hidden
        for i in 1..=6 {
            let visible = panel.toggle();
            assert_eq!(visible, i % 2 == 1);
            assert_eq!(panel.visible, visible);
            assert_eq!(panel.focused, visible);
        }
    }

    #[test]
    fn test_height_fraction() {
        let panel = Panel::new(0.35, 80, 40);
        assert_eq!(panel.height(), 14);

        let half = Panel::new(0.5, 80, 40);
        assert_eq!(half.height(), 20);
    }

    #[test]
    fn test_height_clamped_for_tiny_terminals() {
        let panel = Panel::new(0.9, 80, 6);
        // Leaves the host row and status bar alive
        assert!(panel.height() <= 4);
        assert!(panel.height() >= MIN_HEIGHT);
    }

    #[test]
    fn test_fraction_clamped() {
        let panel = Panel::new(5.0, 80, 40);
        assert_eq!(panel.height(), (0.9f32 * 40.0).round() as u16);
    }

    #[test]
    fn test_geometry_consistency() {
        let mut panel = Panel::new(0.35, 80, 40);
        panel.toggle();

        let (x, y, w, h) = panel.content_rect();
        assert_eq!(x, 0);
        assert_eq!(w, 80);
        assert_eq!(y, panel.origin_row() + 1);
        // Content + border + host area + status bar fill the screen
        assert_eq!(panel.origin_row() + 1 + h, 39);
    }

    #[test]
    fn test_contains_only_when_visible() {
        let mut panel = Panel::new(0.35, 80, 40);
        let row_in_panel = panel.origin_row() + 1;
        assert!(!panel.contains(0, row_in_panel));

        panel.toggle();
        assert!(panel.contains(0, row_in_panel));
        assert!(!panel.contains(0, 0));
        // Status bar row is not part of the panel
        assert!(!panel.contains(0, 39));
    }
}
