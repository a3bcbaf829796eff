use chrono::{DateTime, Utc};

/// Representa un item reproducible resuelto por yt-dlp.
///
/// Inmutable una vez construido, salvo `requested_by`, que se asigna una
/// sola vez cuando un comando convierte el resultado anónimo del resolver
/// en un item de la cola. Se permiten duplicados.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub url: String,
    pub title: String,
    /// Duración como texto para mostrar ("3:52"), tal como la entrega yt-dlp.
    pub duration: String,
    pub thumbnail: Option<String>,
    pub requested_by: String,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(url: String, title: String, duration: String, thumbnail: Option<String>) -> Self {
        Self {
            url,
            title,
            duration,
            thumbnail,
            requested_by: String::new(),
            added_at: Utc::now(),
        }
    }

    /// Asigna quién pidió el track (nombre visible del usuario).
    pub fn requested_by(mut self, name: impl Into<String>) -> Self {
        self.requested_by = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_requested_by_se_asigna() {
        let track = Track::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            "Never Gonna Give You Up".into(),
            "3:32".into(),
            None,
        )
        .requested_by("yei");

        assert_eq!(track.requested_by, "yei");
        assert_eq!(track.duration, "3:32");
    }
}
