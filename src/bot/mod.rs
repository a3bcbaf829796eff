//! Núcleo del bot de Discord: registro de comandos y despacho de
//! interacciones hacia el [`Player`].

use anyhow::Result;
use serenity::all::{Context, EventHandler, GuildId, Interaction, Ready};
use serenity::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::audio::player::Player;
use crate::config::Config;

pub struct RitmoBot {
    config: Arc<Config>,
    pub player: Arc<Player>,
}

impl RitmoBot {
    pub fn new(config: Arc<Config>, player: Arc<Player>) -> Self {
        Self { config, player }
    }

    /// Registra los comandos slash, globales o por guild según config.
    /// Los de guild propagan en segundos; los globales tardan hasta una hora.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::from(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild configurada: {}", guild_id);
                    return Ok(());
                }
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos registrados en guild {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RitmoBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = handlers::handle_component(&ctx, component, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }
}
