use anyhow::Result;
use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::model::application::CommandOptionType;
use serenity::model::id::GuildId;
use serenity::prelude::Context;

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        clear_command(),
    ]
}

/// Registra comandos globales.
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos en una guild específica (desarrollo).
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o la agrega a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta al siguiente track de la cola")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene todo y desconecta el bot")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Vacía la cola sin tocar el track actual")
}
