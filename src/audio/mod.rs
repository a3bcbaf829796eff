//! # Audio
//!
//! Motor de reproducción por guild:
//!
//! - [`track`] — descripción inmutable de un item reproducible.
//! - [`queue`] — cola FIFO y banderas de sesión por guild ([`queue::QueueStore`]).
//! - [`pipeline`] — cadena externa yt-dlp → ffmpeg como recurso con
//!   terminación garantizada.
//! - [`player`] — la máquina de estados que arranca, reemplaza y
//!   desmonta streams en respuesta a comandos y eventos de voz.

pub mod pipeline;
pub mod player;
pub mod queue;
pub mod track;
