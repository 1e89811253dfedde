use std::fmt;

use crate::protocol::{LogRecord, PlotCmd, WindowEvent};

/// Identifier the child assigned to a window. The controller never mints
/// these; it only hands back ids it has seen in `WINDOW NEW` events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(String);

impl WindowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowId {
    fn from(id: &str) -> Self {
        WindowId(id.to_string())
    }
}

impl From<String> for WindowId {
    fn from(id: String) -> Self {
        WindowId(id)
    }
}

/// Per-window state, updated exclusively by inbound events.
///
/// Loading (`throbbing`) and redrawing (`plotting`) are orthogonal brackets
/// and may overlap. A page load is the interval between a matched
/// START_THROBBER/STOP_THROBBER pair. Death is monotonic: nothing revives a
/// window after DESTROY.
#[derive(Debug)]
pub struct Window {
    winid: WindowId,
    coreid: String,
    existing: String,
    newtab: bool,
    clone: bool,
    alive: bool,
    width: i32,
    height: i32,
    title: String,
    url: String,
    status: String,
    pointer: String,
    scale: f64,
    scrollx: i32,
    scrolly: i32,
    content_width: i32,
    content_height: i32,
    throbbing: bool,
    plotting: bool,
    plotted: Vec<PlotCmd>,
    page_info_state: String,
    log: Vec<LogRecord>,
}

impl Window {
    pub(crate) fn new(
        winid: WindowId,
        coreid: String,
        existing: String,
        newtab: bool,
        clone: bool,
    ) -> Self {
        Self {
            winid,
            coreid,
            existing,
            newtab,
            clone,
            alive: true,
            width: 0,
            height: 0,
            title: String::new(),
            url: String::new(),
            status: String::new(),
            pointer: String::new(),
            scale: 1.0,
            scrollx: 0,
            scrolly: 0,
            content_width: 0,
            content_height: 0,
            throbbing: false,
            plotting: false,
            plotted: Vec::new(),
            page_info_state: String::new(),
            log: Vec::new(),
        }
    }

    pub(crate) fn apply(&mut self, event: WindowEvent) {
        match event {
            // NEW creates the window and is handled by the session
            WindowEvent::New { .. } => {}
            WindowEvent::Destroy => self.alive = false,
            WindowEvent::Size { width, height }
            | WindowEvent::GetDimensions { width, height } => {
                self.width = width;
                self.height = height;
            }
            WindowEvent::Title(title) => self.title = title,
            WindowEvent::RedrawStart => {
                self.plotted.clear();
                self.plotting = true;
            }
            WindowEvent::RedrawStop => self.plotting = false,
            WindowEvent::NewContent | WindowEvent::NewIcon | WindowEvent::UpdateBox => {}
            WindowEvent::StartThrobber => self.throbbing = true,
            WindowEvent::StopThrobber => self.throbbing = false,
            WindowEvent::SetScroll { x, y } | WindowEvent::GetScroll { x, y } => {
                self.scrollx = x;
                self.scrolly = y;
            }
            WindowEvent::ScrollStart => {
                self.scrollx = 0;
                self.scrolly = 0;
            }
            WindowEvent::UpdateExtent { width, height } => {
                self.content_width = width;
                self.content_height = height;
            }
            WindowEvent::SetStatus(status) => self.status = status,
            WindowEvent::SetPointer(pointer) => self.pointer = pointer,
            WindowEvent::SetScale(scale) => self.scale = scale,
            WindowEvent::SetUrl(url) => self.url = url,
        }
    }

    pub(crate) fn push_plot(&mut self, cmd: PlotCmd) {
        self.plotted.push(cmd);
    }

    pub(crate) fn push_log(&mut self, record: LogRecord) {
        self.log.push(record);
    }

    pub(crate) fn truncate_log(&mut self) {
        self.log.clear();
    }

    pub fn id(&self) -> &WindowId {
        &self.winid
    }

    pub fn coreid(&self) -> &str {
        &self.coreid
    }

    /// Raw id token of the window this one was opened from.
    pub fn existing(&self) -> &str {
        &self.existing
    }

    pub fn is_newtab(&self) -> bool {
        self.newtab
    }

    pub fn is_clone(&self) -> bool {
        self.clone
    }

    pub fn alive(&self) -> bool {
        self.alive
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn scroll(&self) -> (i32, i32) {
        (self.scrollx, self.scrolly)
    }

    pub fn content_extent(&self) -> (i32, i32) {
        (self.content_width, self.content_height)
    }

    pub fn throbbing(&self) -> bool {
        self.throbbing
    }

    pub fn plotting(&self) -> bool {
        self.plotting
    }

    /// Drawing commands captured by the most recent redraw bracket.
    pub fn plotted(&self) -> &[PlotCmd] {
        &self.plotted
    }

    pub fn page_info_state(&self) -> &str {
        &self.page_info_state
    }

    pub(crate) fn set_page_info_state(&mut self, state: String) {
        self.page_info_state = state;
    }

    pub fn log(&self) -> &[LogRecord] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Window {
        Window::new("win0".into(), "core0".into(), "(nil)".into(), false, false)
    }

    #[test]
    fn throbber_brackets_toggle_loading() {
        let mut win = window();
        assert!(!win.throbbing());
        win.apply(WindowEvent::StartThrobber);
        assert!(win.throbbing());
        win.apply(WindowEvent::StopThrobber);
        assert!(!win.throbbing());
    }

    #[test]
    fn redraw_start_clears_captured_plots() {
        let mut win = window();
        win.apply(WindowEvent::RedrawStart);
        win.push_plot(PlotCmd::Text { x: 0, y: 0, text: "old".into() });
        win.apply(WindowEvent::RedrawStop);
        assert_eq!(win.plotted().len(), 1);

        win.apply(WindowEvent::RedrawStart);
        assert!(win.plotting());
        assert!(win.plotted().is_empty());
    }

    #[test]
    fn death_is_monotonic() {
        let mut win = window();
        win.apply(WindowEvent::Destroy);
        assert!(!win.alive());
        // later events update state but never revive the window
        win.apply(WindowEvent::StartThrobber);
        win.apply(WindowEvent::Size { width: 10, height: 10 });
        assert!(!win.alive());
    }

    #[test]
    fn defaults_match_a_fresh_window() {
        let win = window();
        assert_eq!(win.scale(), 1.0);
        assert_eq!(win.size(), (0, 0));
        assert_eq!(win.scroll(), (0, 0));
        assert!(win.alive());
        assert!(!win.plotting());
        assert!(win.log().is_empty());
    }

    #[test]
    fn scroll_events_update_position() {
        let mut win = window();
        win.apply(WindowEvent::SetScroll { x: 5, y: 9 });
        assert_eq!(win.scroll(), (5, 9));
        win.apply(WindowEvent::ScrollStart);
        assert_eq!(win.scroll(), (0, 0));
    }
}
