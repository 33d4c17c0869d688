//! In-memory terminal used by tests and the demo binary.
//!
//! Stores decoded output lines in a bounded scrollback with no
//! escape-sequence interpretation; that belongs to the real widget. A
//! [`MemoryTerminalProbe`] keeps shared access to the state after the
//! terminal has been boxed into an owner, so tests can inspect contents and
//! drive keystrokes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::terminal::{
    ContainerHandle, DataCallback, Disposable, DisposeHandle, FitCapability, RendererCapability,
    SearchCapability, Terminal, TerminalFactory, TerminalParts,
};
use crate::DEFAULT_SCROLLBACK_LINES;

#[derive(Default)]
struct MemoryState {
    lines: Vec<String>,
    partial: String,
    /// Trailing bytes of an incomplete UTF-8 sequence, completed by the
    /// next chunk. PTY output arrives in arbitrary frame boundaries.
    pending: Vec<u8>,
    /// Lines dropped from the head so far; keeps absolute line indices
    /// stable for cursor-based readers while the scrollback trims.
    dropped: usize,
    max_lines: usize,
    scrolled_to_bottom: bool,
    focused: bool,
    mounted: Option<Uuid>,
    fitted: Option<(u16, u16)>,
    disposed: bool,
    search_query: Option<String>,
    search_matches: usize,
}

impl MemoryState {
    fn push_bytes(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        let bytes = std::mem::take(&mut self.pending);
        let mut slice = bytes.as_slice();
        loop {
            match std::str::from_utf8(slice) {
                Ok(text) => {
                    self.partial.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = slice.split_at(err.valid_up_to());
                    self.partial.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.partial.push(char::REPLACEMENT_CHARACTER);
                            slice = &after[len..];
                        }
                        None => {
                            // Incomplete trailing sequence; wait for the
                            // rest of the code point.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.truncate(line.trim_end_matches(['\n', '\r']).len());
            self.lines.push(line);
        }
        if self.lines.len() > self.max_lines {
            let excess = self.lines.len() - self.max_lines;
            self.lines.drain(..excess);
            self.dropped += excess;
        }
    }

    fn contents(&self) -> String {
        let mut text = self.lines.join("\n");
        if !self.partial.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.partial);
        }
        text
    }
}

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    handlers: HashMap<u64, DataCallback>,
}

/// In-memory [`Terminal`] implementation.
pub struct MemoryTerminal {
    state: Arc<Mutex<MemoryState>>,
    handlers: Arc<Mutex<HandlerTable>>,
}

impl MemoryTerminal {
    pub fn new() -> Self {
        Self::with_scrollback(DEFAULT_SCROLLBACK_LINES)
    }

    pub fn with_scrollback(max_lines: usize) -> Self {
        let state = MemoryState {
            max_lines,
            scrolled_to_bottom: true,
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            handlers: Arc::new(Mutex::new(HandlerTable::default())),
        }
    }

    /// Shared view onto this terminal's state, valid after the terminal has
    /// been boxed away into an owner.
    pub fn probe(&self) -> MemoryTerminalProbe {
        MemoryTerminalProbe {
            state: Arc::clone(&self.state),
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl Default for MemoryTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal for MemoryTerminal {
    fn write(&mut self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.push_bytes(data);
        state.scrolled_to_bottom = false;
    }

    fn clear(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.dropped += state.lines.len();
        state.lines.clear();
        state.partial.clear();
        state.pending.clear();
    }

    fn focus(&mut self) {
        self.state.lock().unwrap().focused = true;
    }

    fn scroll_to_bottom(&mut self) {
        self.state.lock().unwrap().scrolled_to_bottom = true;
    }

    fn mount(&mut self, container: &ContainerHandle) {
        self.state.lock().unwrap().mounted = Some(container.id);
    }

    fn on_data(&mut self, callback: DataCallback) -> Box<dyn DisposeHandle> {
        let mut table = self.handlers.lock().unwrap();
        let id = table.next_id;
        table.next_id += 1;
        table.handlers.insert(id, callback);
        Box::new(MemoryDataHandle {
            id,
            table: Arc::downgrade(&self.handlers),
        })
    }

    fn dispose(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.disposed = true;
        state.mounted = None;
        self.handlers.lock().unwrap().handlers.clear();
    }
}

struct MemoryDataHandle {
    id: u64,
    table: Weak<Mutex<HandlerTable>>,
}

impl DisposeHandle for MemoryDataHandle {
    fn dispose(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().unwrap().handlers.remove(&self.id);
        }
    }
}

/// Inspection and input-driving handle for a [`MemoryTerminal`].
#[derive(Clone)]
pub struct MemoryTerminalProbe {
    state: Arc<Mutex<MemoryState>>,
    handlers: Arc<Mutex<HandlerTable>>,
}

impl MemoryTerminalProbe {
    pub fn contents(&self) -> String {
        self.state.lock().unwrap().contents()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    pub fn line_count(&self) -> usize {
        self.state.lock().unwrap().lines.len()
    }

    /// Complete lines at or after the absolute line index `cursor`, the
    /// next cursor, and the current partial line. Absolute indices keep
    /// counting across scrollback trimming, so a reader polling with the
    /// returned cursor never stalls when old lines are dropped.
    pub fn lines_after(&self, cursor: usize) -> (Vec<String>, usize, String) {
        let state = self.state.lock().unwrap();
        let start = cursor
            .saturating_sub(state.dropped)
            .min(state.lines.len());
        (
            state.lines[start..].to_vec(),
            state.dropped + state.lines.len(),
            state.partial.clone(),
        )
    }

    /// Number of live input-data handlers. The owner invariant keeps this
    /// at one for an attached terminal.
    pub fn live_handler_count(&self) -> usize {
        self.handlers.lock().unwrap().handlers.len()
    }

    /// Simulate the user typing: deliver bytes to every registered handler.
    pub fn feed_input(&self, data: &[u8]) {
        let mut table = self.handlers.lock().unwrap();
        for callback in table.handlers.values_mut() {
            callback(data);
        }
    }

    pub fn mounted_container(&self) -> Option<Uuid> {
        self.state.lock().unwrap().mounted
    }

    pub fn fitted(&self) -> Option<(u16, u16)> {
        self.state.lock().unwrap().fitted
    }

    pub fn is_scrolled_to_bottom(&self) -> bool {
        self.state.lock().unwrap().scrolled_to_bottom
    }

    pub fn is_focused(&self) -> bool {
        self.state.lock().unwrap().focused
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().unwrap().disposed
    }

    pub fn search_matches(&self) -> usize {
        self.state.lock().unwrap().search_matches
    }
}

struct MemoryFit {
    state: Arc<Mutex<MemoryState>>,
    released: bool,
}

impl FitCapability for MemoryFit {
    fn fit(&mut self, cols: u16, rows: u16) {
        self.state.lock().unwrap().fitted = Some((cols, rows));
    }
}

impl Disposable for MemoryFit {
    fn dispose(&mut self) -> Result<()> {
        if self.released {
            bail!("fit capability already released");
        }
        self.released = true;
        Ok(())
    }
}

struct MemorySearch {
    state: Arc<Mutex<MemoryState>>,
    released: bool,
}

impl SearchCapability for MemorySearch {
    fn find_next(&mut self, needle: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let matches = state.contents().matches(needle).count();
        state.search_query = Some(needle.to_string());
        state.search_matches = matches;
        matches > 0
    }

    fn clear_decorations(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.search_query = None;
        state.search_matches = 0;
    }
}

impl Disposable for MemorySearch {
    fn dispose(&mut self) -> Result<()> {
        if self.released {
            bail!("search capability already released");
        }
        self.released = true;
        Ok(())
    }
}

struct MemoryRenderer {
    released: bool,
}

impl RendererCapability for MemoryRenderer {}

impl Disposable for MemoryRenderer {
    fn dispose(&mut self) -> Result<()> {
        if self.released {
            bail!("renderer already released");
        }
        self.released = true;
        Ok(())
    }
}

/// Factory producing [`MemoryTerminal`]s. Records a probe for each created
/// terminal so callers can inspect them later.
pub struct MemoryTerminalFactory {
    renderer_available: bool,
    probes: Mutex<Vec<MemoryTerminalProbe>>,
}

impl MemoryTerminalFactory {
    pub fn new() -> Self {
        Self {
            renderer_available: true,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Simulate a host that refuses accelerated rendering.
    pub fn without_renderer() -> Self {
        Self {
            renderer_available: false,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Probes for every terminal created so far, in creation order.
    pub fn probes(&self) -> Vec<MemoryTerminalProbe> {
        self.probes.lock().unwrap().clone()
    }

    pub fn last_probe(&self) -> Option<MemoryTerminalProbe> {
        self.probes.lock().unwrap().last().cloned()
    }
}

impl Default for MemoryTerminalFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalFactory for MemoryTerminalFactory {
    fn create(&self, _container: &ContainerHandle) -> TerminalParts {
        let terminal = MemoryTerminal::new();
        let probe = terminal.probe();
        let state = Arc::clone(&probe.state);
        self.probes.lock().unwrap().push(probe);

        TerminalParts {
            terminal: Box::new(terminal),
            fit: Box::new(MemoryFit {
                state: Arc::clone(&state),
                released: false,
            }),
            search: Box::new(MemorySearch {
                state,
                released: false,
            }),
            renderer: self
                .renderer_available
                .then(|| Box::new(MemoryRenderer { released: false }) as Box<dyn RendererCapability>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrollback_is_bounded() {
        let mut term = MemoryTerminal::with_scrollback(10);
        let probe = term.probe();
        for i in 0..50 {
            term.write(format!("line {i}\n").as_bytes());
        }
        assert_eq!(probe.line_count(), 10);
        assert!(probe.contains("line 49"));
        assert!(!probe.contains("line 5\n"));
    }

    #[test]
    fn partial_lines_are_visible() {
        let mut term = MemoryTerminal::new();
        let probe = term.probe();
        term.write(b"$ ech");
        assert!(probe.contains("$ ech"));
        term.write(b"o hi\r\n");
        assert_eq!(probe.line_count(), 1);
        assert!(probe.contains("$ echo hi"));
    }

    #[test]
    fn multibyte_output_split_across_writes_stays_intact() {
        let mut term = MemoryTerminal::new();
        let probe = term.probe();

        let bytes = "résultat: 42°\r\n".as_bytes();
        let (head, tail) = bytes.split_at(2); // cuts the é in half
        term.write(head);
        term.write(tail);

        assert!(probe.contains("résultat: 42°"));
        assert!(!probe.contents().contains(char::REPLACEMENT_CHARACTER));

        // Genuinely invalid bytes still degrade to a replacement character
        // instead of being held forever.
        term.write(b"\xffok\r\n");
        assert!(probe.contains("\u{fffd}ok"));
    }

    #[test]
    fn line_cursor_survives_scrollback_trimming() {
        let mut term = MemoryTerminal::with_scrollback(5);
        let probe = term.probe();

        term.write(b"a\nb\n");
        let (lines, cursor, partial) = probe.lines_after(0);
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(cursor, 2);
        assert_eq!(partial, "");

        for i in 0..10 {
            term.write(format!("line {i}\n").as_bytes());
        }

        // Lines 0..=6 are gone; the cursor resumes at the oldest retained
        // line instead of stalling on a now-invalid offset.
        let (lines, cursor, _) = probe.lines_after(cursor);
        assert_eq!(lines, vec!["line 5", "line 6", "line 7", "line 8", "line 9"]);
        assert_eq!(cursor, 12);

        term.write(b"$ ec");
        let (lines, _, partial) = probe.lines_after(cursor);
        assert!(lines.is_empty());
        assert_eq!(partial, "$ ec");
    }

    #[test]
    fn disposed_handle_stops_delivery() {
        let mut term = MemoryTerminal::new();
        let probe = term.probe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut handle = term.on_data(Box::new(move |data| {
            sink.lock().unwrap().extend_from_slice(data);
        }));

        probe.feed_input(b"a");
        handle.dispose();
        probe.feed_input(b"b");

        assert_eq!(*seen.lock().unwrap(), b"a");
        assert_eq!(probe.live_handler_count(), 0);
    }
}
