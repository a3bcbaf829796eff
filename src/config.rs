use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para registrar comandos solo en un guild de desarrollo

    // Audio
    pub opus_bitrate: u32,
    pub max_queue_size: usize,

    // Sesión
    pub idle_timeout_secs: u64,
    pub reconnect_grace_secs: u64,

    // yt-dlp
    pub cookies_file: Option<String>,
    pub cookies_from_browser: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "128000".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            idle_timeout_secs: std::env::var("IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string()) // 5 minutos
                .parse()?,
            reconnect_grace_secs: std::env::var("RECONNECT_GRACE_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            cookies_file: std::env::var("YT_DLP_COOKIES_FILE").ok(),
            cookies_from_browser: std::env::var("YT_DLP_COOKIES_FROM_BROWSER").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Chequeos de sanidad sobre los valores cargados.
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510_000 {
            anyhow::bail!(
                "El bitrate Opus no puede superar 510kbps, se recibió: {}",
                self.opus_bitrate
            );
        }
        if self.opus_bitrate < 8_000 {
            anyhow::bail!(
                "Bitrate Opus demasiado bajo, mínimo 8kbps, se recibió: {}",
                self.opus_bitrate
            );
        }
        if self.max_queue_size == 0 {
            anyhow::bail!("El tamaño máximo de cola debe ser mayor a 0");
        }
        if self.idle_timeout_secs == 0 {
            anyhow::bail!("El timeout de inactividad debe ser mayor a 0");
        }
        Ok(())
    }

    /// Resumen apto para logs: sin token ni datos sensibles.
    pub fn summary(&self) -> String {
        format!(
            "Config:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}kbps, cola máx {}\n  \
            Sesión: idle {}s, gracia de reconexión {}s\n  \
            Cookies: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.opus_bitrate / 1000,
            self.max_queue_size,
            self.idle_timeout_secs,
            self.reconnect_grace_secs,
            if self.cookies_file.is_some() {
                "archivo"
            } else if self.cookies_from_browser.is_some() {
                "navegador"
            } else {
                "no"
            },
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Sin defaults para Discord: son obligatorios
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            opus_bitrate: 128_000,
            max_queue_size: 100,
            idle_timeout_secs: 300,
            reconnect_grace_secs: 5,
            cookies_file: None,
            cookies_from_browser: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_es_valido() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_bitrate_fuera_de_rango() {
        let mut config = Config::default();
        config.opus_bitrate = 600_000;
        assert!(config.validate().is_err());

        config.opus_bitrate = 4_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cola_vacia_invalida() {
        let mut config = Config::default();
        config.max_queue_size = 0;
        assert!(config.validate().is_err());
    }
}
