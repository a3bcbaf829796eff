use serenity::all::Timestamp;
use serenity::builder::{CreateEmbed, CreateEmbedFooter};

use crate::audio::track::Track;

/// Paleta de colores del bot.
pub mod colors {
    use serenity::all::Colour;

    pub const BLURPLE: Colour = Colour::new(0x5865f2);
    pub const PLAYED_GRAY: Colour = Colour::from_rgb(108, 117, 125);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
}

const FOOTER: &str = "🎵 Ritmo";

/// Embed de Reproduciendo Ahora para el track actual.
pub fn now_playing(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .color(colors::BLURPLE)
        .field("⏱️ Duración", duration_or_live(track), true);

    if !track.requested_by.is_empty() {
        embed = embed.field("👤 Pedido por", &track.requested_by, true);
    }
    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(&track.url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(FOOTER))
}

/// Versión apagada del embed anterior, para cuando el track ya terminó.
pub fn played(track: &Track) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Reproducido")
        .description(format!("**{}**", track.title))
        .color(colors::PLAYED_GRAY)
        .url(&track.url)
        .footer(CreateEmbedFooter::new(FOOTER))
}

/// Embed con el estado de la cola: track actual más los pendientes en
/// orden. Muestra hasta 10 pendientes y resume el resto.
pub fn queue(current: Option<&Track>, pending: &[Track]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::BLURPLE)
        .footer(CreateEmbedFooter::new(FOOTER));

    match current {
        Some(track) => {
            embed = embed.field(
                "🎵 Sonando",
                format!("**{}** ({})", track.title, duration_or_live(track)),
                false,
            );
        }
        None => {
            embed = embed.description("No hay nada sonando.");
        }
    }

    if pending.is_empty() {
        return embed.field("⏭️ Siguientes", "La cola está vacía.", false);
    }

    let mut lines: Vec<String> = pending
        .iter()
        .take(10)
        .enumerate()
        .map(|(i, track)| format!("`{}.` **{}** ({})", i + 1, track.title, duration_or_live(track)))
        .collect();
    if pending.len() > 10 {
        lines.push(format!("… y {} más", pending.len() - 10));
    }

    embed.field("⏭️ Siguientes", lines.join("\n"), false)
}

/// Embed rojo genérico para reportar fallos de un comando.
pub fn error(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(message.to_string())
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(FOOTER))
}

fn duration_or_live(track: &Track) -> String {
    if track.duration.is_empty() {
        "🔴 En vivo".to_string()
    } else {
        track.duration.clone()
    }
}
