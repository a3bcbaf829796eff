use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::audio::track::Track;

/// Máximo de recomendaciones que se conservan por track.
const MAX_RECOMMENDATIONS: usize = 3;

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:v=|youtu\.be/)([A-Za-z0-9_-]{11})").expect("regex de video id válida")
});

/// Payload que imprime `yt-dlp --dump-json`. Solo los campos que usamos;
/// todos opcionales porque los modos flat-playlist omiten varios.
#[derive(Debug, Deserialize)]
struct RawTrackInfo {
    webpage_url: Option<String>,
    url: Option<String>,
    id: Option<String>,
    title: Option<String>,
    duration_string: Option<String>,
    thumbnail: Option<String>,
}

/// Convierte queries de texto libre o URLs en [`Track`]s llamando a
/// yt-dlp como proceso externo.
///
/// Ningún fallo del proceso externo cruza esta frontera como error:
/// salida distinta de cero, stdout vacío o JSON malformado se reportan
/// como "sin resultados" (`None` / vec vacío).
pub struct Resolver {
    cookie_args: Vec<String>,
}

impl Resolver {
    pub fn new(cookie_args: Vec<String>) -> Self {
        Self { cookie_args }
    }

    pub fn cookie_args(&self) -> &[String] {
        &self.cookie_args
    }

    /// Resuelve una query a exactamente un track. URLs absolutas se
    /// resuelven directo; cualquier otra cosa es una búsqueda "primer
    /// resultado".
    pub async fn search(&self, query: &str) -> Option<Track> {
        let target = if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{query}")
        };

        info!("🔍 Buscando: \"{}\"", query);

        let output = Command::new("yt-dlp")
            .arg(&target)
            .args(["--dump-json", "--no-playlist"])
            .args(&self.cookie_args)
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("yt-dlp no se pudo lanzar: {e}");
                return None;
            }
        };

        if !output.status.success() || output.stdout.is_empty() {
            warn!(
                "yt-dlp search falló (exit {:?}) para \"{}\"",
                output.status.code(),
                query
            );
            return None;
        }

        let track = parse_single(&String::from_utf8_lossy(&output.stdout));
        match &track {
            Some(track) => info!("✅ Encontrado: \"{}\" ({})", track.title, track.duration),
            None => warn!("No se pudo parsear el JSON de yt-dlp para \"{}\"", query),
        }
        track
    }

    /// Recomendaciones "mix/related" para un track terminado. Mejor
    /// esfuerzo, totalmente fuera del camino crítico de streaming: todo
    /// fallo devuelve un vec vacío y nunca afecta la reproducción.
    pub async fn fetch_recommendations(&self, source_url: &str) -> Vec<Track> {
        let Some(video_id) = extract_video_id(source_url) else {
            debug!("Sin video id derivable de {}", source_url);
            return Vec::new();
        };

        let mix_url = format!("https://www.youtube.com/watch?v={video_id}&list=RD{video_id}");
        info!("🎯 Buscando recomendaciones para {}", video_id);

        let output = Command::new("yt-dlp")
            .args(["--flat-playlist", "--dump-json"])
            .args(&self.cookie_args)
            .arg(&mix_url)
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) if output.status.success() && !output.stdout.is_empty() => output,
            Ok(output) => {
                warn!(
                    "yt-dlp recomendaciones falló (exit {:?})",
                    output.status.code()
                );
                return Vec::new();
            }
            Err(e) => {
                warn!("yt-dlp recomendaciones no se pudo lanzar: {e}");
                return Vec::new();
            }
        };

        let tracks =
            parse_recommendations(&String::from_utf8_lossy(&output.stdout), &video_id);
        info!("🎯 {} recomendaciones encontradas", tracks.len());
        tracks
    }
}

pub fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Extrae el id de 11 caracteres de una URL de YouTube (watch?v= o youtu.be/).
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID
        .captures(url)
        .map(|caps| caps[1].to_string())
}

fn parse_single(raw: &str) -> Option<Track> {
    let info: RawTrackInfo = serde_json::from_str(raw.trim()).ok()?;
    let url = info.webpage_url.or(info.url)?;
    Some(Track::new(
        url,
        info.title.unwrap_or_else(|| "Unknown".into()),
        info.duration_string.unwrap_or_else(|| "0:00".into()),
        info.thumbnail.filter(|t| !t.is_empty()),
    ))
}

/// Una línea JSON por item en modo flat-playlist. Se salta el video de
/// origen y corta en [`MAX_RECOMMENDATIONS`]; las líneas malformadas se
/// ignoran.
fn parse_recommendations(raw: &str, source_id: &str) -> Vec<Track> {
    let mut tracks = Vec::new();

    for line in raw.trim().lines() {
        let Ok(info) = serde_json::from_str::<RawTrackInfo>(line) else {
            continue;
        };
        let id = info.id.clone().or_else(|| info.url.clone());
        if id.as_deref() == Some(source_id) {
            continue;
        }

        let url = match info.url {
            Some(url) if url.starts_with("http") => url,
            _ => match &id {
                Some(id) => format!("https://www.youtube.com/watch?v={id}"),
                None => continue,
            },
        };

        tracks.push(Track::new(
            url,
            info.title.unwrap_or_else(|| "Unknown".into()),
            info.duration_string.unwrap_or_else(|| "0:00".into()),
            info.thumbnail.filter(|t| !t.is_empty()),
        ));

        if tracks.len() >= MAX_RECOMMENDATIONS {
            break;
        }
    }

    tracks
}

/// Args de cookies para yt-dlp; el archivo explícito gana sobre el browser.
pub fn cookie_args(file: Option<String>, browser: Option<String>) -> Vec<String> {
    if let Some(file) = file {
        return vec!["--cookies".into(), file];
    }
    if let Some(browser) = browser {
        return vec!["--cookies-from-browser".into(), browser];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deteccion_de_urls() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("http://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ftp://example.com/cancion.mp3"));
    }

    #[test]
    fn test_extraer_video_id() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=42").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert!(extract_video_id("https://example.com/video").is_none());
    }

    #[test]
    fn test_parse_single_completo() {
        let raw = r#"{
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration_string": "3:32",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hq720.jpg"
        }"#;

        let track = parse_single(raw).unwrap();
        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.duration, "3:32");
        assert!(track.thumbnail.is_some());
    }

    #[test]
    fn test_parse_single_con_campos_faltantes() {
        let track = parse_single(r#"{"url": "https://youtu.be/abc12345678"}"#).unwrap();
        assert_eq!(track.title, "Unknown");
        assert_eq!(track.duration, "0:00");
        assert!(track.thumbnail.is_none());
    }

    #[test]
    fn test_parse_single_malformado_da_none() {
        assert!(parse_single("no es json").is_none());
        assert!(parse_single("").is_none());
        // Sin ninguna URL no hay track.
        assert!(parse_single(r#"{"title": "x"}"#).is_none());
    }

    #[test]
    fn test_recomendaciones_saltan_el_origen_y_cortan_en_tres() {
        let lines = [
            r#"{"id": "origen00000", "title": "Origen"}"#,
            r#"{"id": "aaaaaaaaaaa", "title": "A"}"#,
            r#"{"id": "bbbbbbbbbbb", "title": "B"}"#,
            "esta linea no es json",
            r#"{"id": "ccccccccccc", "title": "C"}"#,
            r#"{"id": "ddddddddddd", "title": "D"}"#,
        ]
        .join("\n");

        let tracks = parse_recommendations(&lines, "origen00000");
        let titles: Vec<_> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(
            tracks[0].url,
            "https://www.youtube.com/watch?v=aaaaaaaaaaa"
        );
    }

    #[test]
    fn test_cookie_args_prioriza_archivo() {
        assert_eq!(
            cookie_args(Some("/tmp/c.txt".into()), Some("firefox".into())),
            vec!["--cookies".to_string(), "/tmp/c.txt".to_string()]
        );
        assert_eq!(
            cookie_args(None, Some("firefox".into())),
            vec!["--cookies-from-browser".to_string(), "firefox".to_string()]
        );
        assert!(cookie_args(None, None).is_empty());
    }
}
