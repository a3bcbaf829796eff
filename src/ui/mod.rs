//! Capa de presentación: embeds y botones de los mensajes del bot.

pub mod buttons;
pub mod embeds;
