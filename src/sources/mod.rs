//! Resolución de queries y recomendaciones vía yt-dlp.

pub mod ytdlp;

pub use ytdlp::Resolver;
