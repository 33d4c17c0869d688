use tracing::debug;
use uuid::Uuid;

use crate::terminal::{
    ContainerHandle, DataCallback, DisposeHandle, FitCapability, RendererCapability,
    SearchCapability, Terminal, TerminalParts,
};

/// Owns a terminal widget together with its capabilities and the single
/// currently-registered input-data handler.
///
/// The owner survives detach/reattach cycles: moving the visual surface to a
/// new container never recreates the buffer, so scrollback and screen state
/// are preserved. Exclusively owned by its session, never shared.
pub struct TerminalOwner {
    id: Uuid,
    terminal: Box<dyn Terminal>,
    fit: Box<dyn FitCapability>,
    search: Box<dyn SearchCapability>,
    renderer: Option<Box<dyn RendererCapability>>,
    data_handler: Option<Box<dyn DisposeHandle>>,
    disposed: bool,
}

impl TerminalOwner {
    /// Assemble an owner from freshly created parts, mount it into
    /// `container`, fit it to the container's size and register the
    /// input-data handler.
    pub fn create(parts: TerminalParts, container: &ContainerHandle, on_data: DataCallback) -> Self {
        let TerminalParts {
            mut terminal,
            mut fit,
            search,
            renderer,
        } = parts;

        terminal.mount(container);
        let data_handler = terminal.on_data(on_data);
        fit.fit(container.cols, container.rows);

        Self {
            id: Uuid::new_v4(),
            terminal,
            fit,
            search,
            renderer,
            data_handler: Some(data_handler),
            disposed: false,
        }
    }

    /// Identity of this owner. Stable for its whole life; used to verify
    /// that reattachment never swapped the buffer out underneath a session.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Move the visual surface into a different container.
    ///
    /// The previous input-data handler is disposed before the new one is
    /// registered: two live handlers would deliver every keystroke twice.
    pub fn reattach(&mut self, container: &ContainerHandle, on_data: DataCallback) {
        if let Some(mut old) = self.data_handler.take() {
            old.dispose();
        }
        self.terminal.mount(container);
        self.data_handler = Some(self.terminal.on_data(on_data));
        self.fit.fit(container.cols, container.rows);
        self.terminal.scroll_to_bottom();
    }

    /// Write PTY output into the buffer and keep the viewport on the newest
    /// content. A detached owner still accumulates written data.
    pub fn write(&mut self, data: &[u8]) {
        self.terminal.write(data);
        self.terminal.scroll_to_bottom();
    }

    /// Write an inline status line into scroll history, on its own row.
    pub fn write_status_line(&mut self, text: &str) {
        self.write(format!("\r\n{text}\r\n").as_bytes());
    }

    pub fn clear(&mut self) {
        self.terminal.clear();
    }

    pub fn focus(&mut self) {
        self.terminal.focus();
    }

    pub fn fit(&mut self, cols: u16, rows: u16) {
        self.fit.fit(cols, rows);
    }

    pub fn find_next(&mut self, needle: &str) -> bool {
        self.search.find_next(needle)
    }

    pub fn clear_search(&mut self) {
        self.search.clear_decorations();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release everything this owner holds: handler first, then the
    /// capabilities, then the widget itself. Each capability release is
    /// independently fallible and a failure never stops the rest.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(mut handler) = self.data_handler.take() {
            handler.dispose();
        }
        if let Err(err) = self.search.dispose() {
            debug!(%err, "search capability release failed");
        }
        if let Err(err) = self.fit.dispose() {
            debug!(%err, "fit capability release failed");
        }
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(err) = renderer.dispose() {
                debug!(%err, "renderer release failed");
            }
        }
        self.terminal.dispose();
    }
}
