/// Terminal widget abstraction and capability seams.
use anyhow::Result;
use uuid::Uuid;

/// Callback invoked with raw keystroke bytes produced by the terminal.
pub type DataCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Unregisters a previously installed input-data handler.
pub trait DisposeHandle: Send {
    fn dispose(&mut self);
}

/// A resource owned alongside the terminal that can be released
/// independently. Release is fallible: a capability may already be gone.
pub trait Disposable: Send {
    fn dispose(&mut self) -> Result<()>;
}

/// Opaque handle to a visual mount point. Carries the mount's current
/// dimensions so the buffer can be fitted to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: Uuid,
    pub cols: u16,
    pub rows: u16,
}

impl ContainerHandle {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            cols,
            rows,
        }
    }
}

/// Seam to the external terminal widget. The widget keeps its own screen
/// and scrollback state; `mount` moves the visual surface between
/// containers without recreating that state.
pub trait Terminal: Send {
    fn write(&mut self, data: &[u8]);
    fn clear(&mut self);
    fn focus(&mut self);
    fn scroll_to_bottom(&mut self);
    /// Move the visual surface into `container`. Never recreates the buffer.
    fn mount(&mut self, container: &ContainerHandle);
    /// Register an input-data handler. The widget supports any number of
    /// live handlers; keeping it to exactly one is the owner's job.
    fn on_data(&mut self, callback: DataCallback) -> Box<dyn DisposeHandle>;
    fn dispose(&mut self);
}

/// Fits the terminal grid to a container's dimensions.
pub trait FitCapability: Disposable {
    fn fit(&mut self, cols: u16, rows: u16);
}

/// Text search over the buffer. Maintains match state and decorations.
pub trait SearchCapability: Disposable {
    fn find_next(&mut self, needle: &str) -> bool;
    fn clear_decorations(&mut self);
}

/// Accelerated rendering. Optional: construction may fail or be refused by
/// the host, in which case the terminal silently renders unaccelerated.
pub trait RendererCapability: Disposable {}

/// Everything needed to assemble a [`TerminalOwner`](crate::TerminalOwner).
pub struct TerminalParts {
    pub terminal: Box<dyn Terminal>,
    pub fit: Box<dyn FitCapability>,
    pub search: Box<dyn SearchCapability>,
    pub renderer: Option<Box<dyn RendererCapability>>,
}

/// Builds terminal widgets. The session facade calls this once per session
/// key; reattachment reuses the existing widget.
pub trait TerminalFactory: Send + Sync {
    fn create(&self, container: &ContainerHandle) -> TerminalParts;
}
