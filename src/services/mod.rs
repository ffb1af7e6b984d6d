//! External service clients: the media tool (probe/thumbnail/
//! sprite/transcode) and the analysis providers (video-intelligence,
//! speech-to-text). Each has a real adapter — a subprocess invocation for
//! the media tool, an HTTP client for the analysis providers — and a stub
//! used throughout the test suite.

pub mod analysis;
pub mod media_tool;

pub use analysis::{AnalysisProvider, HttpAnalysisProvider, StubAnalysisProvider};
pub use media_tool::{MediaTool, ProcessMediaTool, ProgressSink, SpriteOpts, StubMediaTool, ThumbnailOpts, TranscodeOpts};
