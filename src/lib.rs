pub mod config;
pub mod error;
pub mod exclusive;
pub mod logger;
pub mod output;
pub mod pointer;

#[cfg(windows)]
pub mod canvas;
#[cfg(windows)]
pub mod compositor;
#[cfg(windows)]
pub mod d3d;
#[cfg(windows)]
pub mod pipeline;
#[cfg(windows)]
pub mod session;
#[cfg(windows)]
pub mod surface;
#[cfg(windows)]
pub mod window;

pub use config::{AppConfig, Config, PresentMode};
pub use error::{ExclusiveError, FrameStatus, PresentError};
pub use exclusive::{DirectDisplay, DirectMode, ExclusiveDisplaySession, TargetFormat};
pub use logger::*;
pub use output::Bounds;
pub use pointer::{PointerShape, PointerState, ShapeKind};

#[cfg(windows)]
pub use session::{OutputSession, SessionOptions};
