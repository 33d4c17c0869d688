// Terminal buffer ownership
//
// The terminal widget itself (escape-sequence interpretation, rendering) is
// an external collaborator; this crate defines the seam it is reached
// through and owns its lifecycle: creation, moving the visual surface
// between containers without losing scrollback, and disposal of the widget
// and its capabilities.

mod memory;
mod owner;
mod terminal;

// Re-export public API
pub use memory::{MemoryTerminal, MemoryTerminalFactory, MemoryTerminalProbe};
pub use owner::TerminalOwner;
pub use terminal::{
    ContainerHandle, DataCallback, Disposable, DisposeHandle, FitCapability, RendererCapability,
    SearchCapability, Terminal, TerminalFactory, TerminalParts,
};

// Constants
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
