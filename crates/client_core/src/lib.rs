pub mod board;
pub mod content;
mod gate;

pub use board::{BoardEvent, BoardSync, SyncError};
pub use content::{
    ContentCache, ContentController, ContentEvent, ContentPayload, ContentSource, ContentView,
    FetchError, HttpContentSource,
};
pub use gate::AccessGate;
