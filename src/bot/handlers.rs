use anyhow::Result;
use serenity::builder::{
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::model::application::{CommandInteraction, ComponentInteraction};
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::prelude::Context;
use tracing::info;

use crate::bot::RitmoBot;
use crate::ui::{buttons, embeds};

/// Maneja comandos slash.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &RitmoBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await?,
        "pause" => {
            let message = if bot.player.pause(guild_id).await {
                "⏸️ Reproducción pausada"
            } else {
                "❌ No hay nada que pausar"
            };
            reply(ctx, &command, message).await?;
        }
        "resume" => {
            let message = if bot.player.resume(guild_id).await {
                "▶️ Reproducción reanudada"
            } else {
                "❌ No hay nada pausado"
            };
            reply(ctx, &command, message).await?;
        }
        "skip" => {
            let message = if bot.player.skip(guild_id).await {
                "⏭️ Track saltado"
            } else {
                "❌ No hay nada sonando"
            };
            reply(ctx, &command, message).await?;
        }
        "stop" => {
            bot.player.destroy(guild_id).await;
            reply(ctx, &command, "⏹️ Reproducción detenida, ¡hasta la próxima!").await?;
        }
        "queue" => {
            let (current, pending) = bot.player.queue_snapshot(guild_id);
            let embed = embeds::queue(current.as_ref(), &pending);
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().embed(embed),
                    ),
                )
                .await?;
        }
        "clear" => {
            let removed = bot.player.clear_queue(guild_id);
            let message = format!("🗑️ Cola vaciada ({} tracks descartados)", removed);
            reply(ctx, &command, &message).await?;
        }
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|option| option.name == "query")
        .and_then(|option| option.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Falta el parámetro query"))?
        .to_string();

    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Debes estar en un canal de voz")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    // La búsqueda con yt-dlp tarda más que la ventana de respuesta de
    // Discord: diferir primero.
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let Some(track) = bot.player.search(&query).await else {
        command
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new()
                    .embed(embeds::error(&format!("Sin resultados para `{}`", query))),
            )
            .await?;
        return Ok(());
    };
    let track = track.requested_by(command.user.display_name());

    let was_playing = bot.player.current_track(guild_id).is_some();
    let accepted = bot.player
        .join_and_play(guild_id, voice_channel, command.channel_id, track.clone())
        .await?;

    let message = if !accepted {
        "❌ La cola está llena, probá de nuevo más tarde".to_string()
    } else if was_playing {
        format!("➕ **{}** agregado a la cola", track.title)
    } else {
        format!("🎵 Reproduciendo **{}**", track.title)
    };
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(message))
        .await?;
    Ok(())
}

/// Maneja clicks en los botones del mensaje de Now Playing.
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &RitmoBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    let custom_id = component.data.custom_id.as_str();
    info!("🔘 Botón {} en guild {}", custom_id, guild_id);

    if let Some(index) = buttons::recommendation_index(custom_id) {
        return handle_recommendation(ctx, component, bot, guild_id, index).await;
    }

    let message = match custom_id {
        buttons::button_ids::PAUSE_RESUME => {
            if bot.player.pause(guild_id).await {
                "⏸️ Pausado"
            } else if bot.player.resume(guild_id).await {
                "▶️ Reanudado"
            } else {
                "❌ No hay nada sonando"
            }
        }
        buttons::button_ids::SKIP => {
            if bot.player.skip(guild_id).await {
                "⏭️ Saltado"
            } else {
                "❌ No hay nada sonando"
            }
        }
        buttons::button_ids::STOP => {
            bot.player.destroy(guild_id).await;
            "⏹️ Detenido"
        }
        buttons::button_ids::CLEAR => {
            bot.player.clear_queue(guild_id);
            "🗑️ Cola vaciada"
        }
        _ => "❌ Acción no reconocida",
    };

    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(message)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn handle_recommendation(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
    index: usize,
) -> Result<()> {
    // El botón puede sobrevivir al track que lo generó; en ese caso la
    // recomendación ya no está y el click es un no-op avisado.
    let message = match bot.player.recommendation(guild_id, index) {
        Some(track) => {
            let track = track.requested_by(component.user.display_name());
            let title = track.title.clone();
            if bot.player.enqueue_or_stream(guild_id, track).await {
                format!("➕ **{}** agregado a la cola", title)
            } else {
                "❌ La sesión ya no está activa".to_string()
            }
        }
        None => "❌ Esa recomendación ya no está disponible".to_string(),
    };

    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(message)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content.to_string()),
            ),
        )
        .await?;
    Ok(())
}

/// Canal de voz donde está el usuario, según el caché de la guild.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
