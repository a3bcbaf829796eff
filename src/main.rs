use anyhow::Result;
use serenity::http::Http;
use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod sources;
mod ui;

use crate::audio::player::Player;
use crate::bot::RitmoBot;
use crate::config::Config;
use crate::sources::Resolver;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ritmo=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Ritmo v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let resolver = Resolver::new(sources::ytdlp::cookie_args(
        config.cookies_file.clone(),
        config.cookies_from_browser.clone(),
    ));

    // Http propio para los mensajes que manda el player fuera del ciclo
    // de interacciones (Now Playing y sus ediciones).
    let http = Arc::new(Http::new(&config.discord_token));
    let manager = Songbird::serenity();
    let player = Arc::new(Player::new(manager.clone(), http, resolver, &config));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = RitmoBot::new(config.clone(), player);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    // Shutdown con Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifica que los ejecutables externos del pipeline estén disponibles.
async fn health_check() -> Result<()> {
    let yt_dlp = tokio::process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
