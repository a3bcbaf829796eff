use serenity::all::ButtonStyle;
use serenity::builder::{CreateActionRow, CreateButton};

use crate::audio::track::Track;

/// IDs de los componentes interactivos.
pub mod button_ids {
    pub const PAUSE_RESUME: &str = "music_pause_resume";
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
    pub const CLEAR: &str = "music_clear";
    /// Prefijo de los botones de recomendación; el sufijo es el índice.
    pub const RECOMMEND_PREFIX: &str = "music_rec_";
}

// Discord corta las labels en 80 caracteres.
const MAX_LABEL: usize = 80;

/// Fila de controles del reproductor.
pub fn player_controls() -> Vec<CreateActionRow> {
    vec![control_row()]
}

/// Controles más una fila de botones de recomendación, uno por track.
pub fn player_controls_with_recommendations(recommendations: &[Track]) -> Vec<CreateActionRow> {
    let mut rows = vec![control_row()];
    if recommendations.is_empty() {
        return rows;
    }

    let buttons = recommendations
        .iter()
        .enumerate()
        .map(|(i, track)| {
            CreateButton::new(format!("{}{}", button_ids::RECOMMEND_PREFIX, i))
                .label(clip_label(&track.title))
                .emoji('🎲')
                .style(ButtonStyle::Secondary)
        })
        .collect();
    rows.push(CreateActionRow::Buttons(buttons));
    rows
}

fn control_row() -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::PAUSE_RESUME)
            .emoji('⏯')
            .style(ButtonStyle::Primary),
        CreateButton::new(button_ids::SKIP)
            .emoji('⏭')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::STOP)
            .emoji('⏹')
            .style(ButtonStyle::Danger),
        CreateButton::new(button_ids::CLEAR)
            .emoji('🗑')
            .style(ButtonStyle::Secondary),
    ])
}

/// Índice de recomendación codificado en un custom_id, si lo es.
pub fn recommendation_index(custom_id: &str) -> Option<usize> {
    custom_id
        .strip_prefix(button_ids::RECOMMEND_PREFIX)?
        .parse()
        .ok()
}

fn clip_label(title: &str) -> String {
    if title.chars().count() <= MAX_LABEL {
        return title.to_string();
    }
    let clipped: String = title.chars().take(MAX_LABEL - 1).collect();
    format!("{clipped}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_indice_de_recomendacion() {
        assert_eq!(recommendation_index("music_rec_0"), Some(0));
        assert_eq!(recommendation_index("music_rec_2"), Some(2));
        assert_eq!(recommendation_index("music_skip"), None);
        assert_eq!(recommendation_index("music_rec_x"), None);
    }

    #[test]
    fn test_labels_largas_se_cortan() {
        let long = "a".repeat(200);
        let label = clip_label(&long);
        assert_eq!(label.chars().count(), 80);
        assert!(label.ends_with('…'));
        assert_eq!(clip_label("corto"), "corto");
    }
}
