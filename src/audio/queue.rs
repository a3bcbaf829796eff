use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::audio::track::Track;

/// Estado mutable por guild: cola pendiente, track actual y banderas de
/// la sesión. Los handles de voz y de procesos externos viven en el
/// `Player`; aquí solo va la mitad de datos, que es la única superficie
/// de mutación de la cola.
#[derive(Debug, Default)]
struct GuildQueue {
    pending: VecDeque<Track>,
    current: Option<Track>,
    paused: bool,
    /// True estrictamente durante el arranque de un stream. Evita que un
    /// evento "idle" tardío de un pipeline recién matado avance la cola
    /// dos veces.
    transitioning: bool,
    /// Recomendaciones efímeras; se reemplazan en cada track nuevo.
    recommendations: Vec<Track>,
    /// Se incrementa en cada arranque de stream. Los resultados de tareas
    /// en segundo plano y los eventos de ciclo de vida que traigan una
    /// generación vieja se descartan en silencio.
    generation: u64,
}

/// Mapeo guild -> cola. Única fuente de verdad sobre "este guild está
/// reproduciendo". Las operaciones por clave son atómicas (DashMap).
#[derive(Debug, Default)]
pub struct QueueStore {
    queues: DashMap<GuildId, GuildQueue>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Registra una sesión nueva. Devuelve false si el guild ya tenía una
    /// (nunca hay más de una entrada por guild).
    pub fn insert(&self, guild_id: GuildId) -> bool {
        if self.queues.contains_key(&guild_id) {
            return false;
        }
        self.queues.insert(guild_id, GuildQueue::default());
        true
    }

    pub fn remove(&self, guild_id: GuildId) -> bool {
        self.queues.remove(&guild_id).is_some()
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.queues.contains_key(&guild_id)
    }

    /// Agrega al final de la cola pendiente. No hace nada si el guild no
    /// tiene sesión.
    pub fn enqueue(&self, guild_id: GuildId, track: Track) {
        if let Some(mut queue) = self.queues.get_mut(&guild_id) {
            info!("➕ Agregado a la cola: {}", track.title);
            queue.pending.push_back(track);
        }
    }

    /// Saca el primero de la cola pendiente (FIFO estricto).
    pub fn dequeue_next(&self, guild_id: GuildId) -> Option<Track> {
        self.queues.get_mut(&guild_id)?.pending.pop_front()
    }

    /// Devuelve un track a la cabeza de la cola. Para el perdedor de una
    /// carrera de arranque: era el próximo en sonar y lo sigue siendo.
    pub fn requeue_front(&self, guild_id: GuildId, track: Track) {
        if let Some(mut queue) = self.queues.get_mut(&guild_id) {
            debug!("Track \"{}\" devuelto a la cabeza de la cola", track.title);
            queue.pending.push_front(track);
        }
    }

    /// Vacía la cola pendiente sin tocar el track actual. Devuelve cuántos
    /// tracks se descartaron.
    pub fn clear_pending(&self, guild_id: GuildId) -> usize {
        match self.queues.get_mut(&guild_id) {
            Some(mut queue) => {
                let removed = queue.pending.len();
                queue.pending.clear();
                if removed > 0 {
                    info!("🗑️ Cola limpiada ({} tracks) en guild {}", removed, guild_id);
                }
                removed
            }
            None => 0,
        }
    }

    pub fn pending_snapshot(&self, guild_id: GuildId) -> Vec<Track> {
        self.queues
            .get(&guild_id)
            .map(|queue| queue.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_len(&self, guild_id: GuildId) -> usize {
        self.queues
            .get(&guild_id)
            .map(|queue| queue.pending.len())
            .unwrap_or(0)
    }

    pub fn current(&self, guild_id: GuildId) -> Option<Track> {
        self.queues.get(&guild_id)?.current.clone()
    }

    /// None si el guild no tiene sesión.
    pub fn is_paused(&self, guild_id: GuildId) -> Option<bool> {
        self.queues.get(&guild_id).map(|queue| queue.paused)
    }

    pub fn set_paused(&self, guild_id: GuildId, paused: bool) {
        if let Some(mut queue) = self.queues.get_mut(&guild_id) {
            queue.paused = paused;
        }
    }

    /// True si un pedido nuevo debe sonar ya mismo en vez de encolarse:
    /// nada reproduciéndose y sin transición en curso.
    pub fn can_stream_now(&self, guild_id: GuildId) -> bool {
        self.queues
            .get(&guild_id)
            .map(|queue| queue.current.is_none() && !queue.transitioning)
            .unwrap_or(false)
    }

    /// Marca el inicio de un stream: levanta `transitioning`, fija el track
    /// actual y devuelve la generación nueva. Devuelve None si el guild no
    /// existe o si ya hay una transición en curso (nunca dos a la vez).
    pub fn begin_transition(&self, guild_id: GuildId, track: Track) -> Option<u64> {
        let mut queue = self.queues.get_mut(&guild_id)?;
        if queue.transitioning {
            debug!("Transición ya en curso en guild {}, ignorando", guild_id);
            return None;
        }
        queue.transitioning = true;
        queue.current = Some(track);
        queue.generation += 1;
        Some(queue.generation)
    }

    /// Cierre exitoso de la transición: el pipeline ya está sonando. Baja
    /// `transitioning`, despausa y descarta las recomendaciones del track
    /// anterior.
    pub fn finish_transition(&self, guild_id: GuildId) {
        if let Some(mut queue) = self.queues.get_mut(&guild_id) {
            queue.transitioning = false;
            queue.paused = false;
            queue.recommendations.clear();
        }
    }

    /// Cierre fallido: solo baja la bandera para que el avance de cola
    /// pueda continuar. Un track fallido nunca debe trabar la cola.
    pub fn abort_transition(&self, guild_id: GuildId) {
        if let Some(mut queue) = self.queues.get_mut(&guild_id) {
            queue.transitioning = false;
        }
    }

    /// Guard del avance de cola: false si el guild no existe o si hay un
    /// reemplazo en curso (el evento que llegó es obsoleto).
    pub fn should_advance(&self, guild_id: GuildId) -> bool {
        self.queues
            .get(&guild_id)
            .map(|queue| !queue.transitioning)
            .unwrap_or(false)
    }

    /// Entra en drenaje: la cola quedó vacía y el track actual terminó.
    pub fn mark_draining(&self, guild_id: GuildId) {
        if let Some(mut queue) = self.queues.get_mut(&guild_id) {
            queue.current = None;
        }
    }

    pub fn generation(&self, guild_id: GuildId) -> Option<u64> {
        self.queues.get(&guild_id).map(|queue| queue.generation)
    }

    /// Aplica recomendaciones solo si siguen correspondiendo al track
    /// actual (misma generación). Devuelve false si el resultado llegó
    /// tarde y se descartó.
    pub fn set_recommendations(
        &self,
        guild_id: GuildId,
        generation: u64,
        recommendations: Vec<Track>,
    ) -> bool {
        match self.queues.get_mut(&guild_id) {
            Some(mut queue) if queue.generation == generation => {
                queue.recommendations = recommendations;
                true
            }
            _ => false,
        }
    }

    pub fn recommendation(&self, guild_id: GuildId, index: usize) -> Option<Track> {
        self.queues
            .get(&guild_id)?
            .recommendations
            .get(index)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> Track {
        Track::new(
            format!("https://www.youtube.com/watch?v={title}"),
            title.to_string(),
            "3:00".into(),
            None,
        )
    }

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    #[test]
    fn test_una_sola_entrada_por_guild() {
        let store = QueueStore::new();
        assert!(store.insert(guild()));
        assert!(!store.insert(guild()));
        assert!(store.remove(guild()));
        assert!(!store.remove(guild()));
    }

    #[test]
    fn test_enqueue_sin_sesion_es_noop() {
        let store = QueueStore::new();
        store.enqueue(guild(), track("a"));
        assert_eq!(store.pending_len(guild()), 0);
        assert!(store.dequeue_next(guild()).is_none());
    }

    #[test]
    fn test_orden_fifo() {
        let store = QueueStore::new();
        store.insert(guild());
        store.enqueue(guild(), track("a"));
        store.enqueue(guild(), track("b"));
        store.enqueue(guild(), track("c"));

        assert_eq!(store.dequeue_next(guild()).unwrap().title, "a");
        assert_eq!(store.dequeue_next(guild()).unwrap().title, "b");
        assert_eq!(store.dequeue_next(guild()).unwrap().title, "c");
        assert!(store.dequeue_next(guild()).is_none());
    }

    #[test]
    fn test_clear_pending_no_toca_el_actual() {
        let store = QueueStore::new();
        store.insert(guild());
        store.begin_transition(guild(), track("actual"));
        store.finish_transition(guild());
        store.enqueue(guild(), track("a"));
        store.enqueue(guild(), track("b"));

        assert_eq!(store.clear_pending(guild()), 2);
        assert_eq!(store.pending_len(guild()), 0);
        assert_eq!(store.current(guild()).unwrap().title, "actual");
    }

    #[test]
    fn test_no_hay_dos_transiciones_a_la_vez() {
        let store = QueueStore::new();
        store.insert(guild());

        let generation = store.begin_transition(guild(), track("a"));
        assert!(generation.is_some());
        // Segunda transición mientras la primera sigue abierta: rechazada.
        assert!(store.begin_transition(guild(), track("b")).is_none());
        assert!(!store.should_advance(guild()));

        store.finish_transition(guild());
        assert!(store.should_advance(guild()));
        assert!(store.begin_transition(guild(), track("b")).is_some());
    }

    #[test]
    fn test_requeue_front_mantiene_el_orden() {
        let store = QueueStore::new();
        store.insert(guild());
        store.enqueue(guild(), track("b"));

        // "a" perdió su arranque: vuelve adelante, no al final.
        store.requeue_front(guild(), track("a"));
        assert_eq!(store.dequeue_next(guild()).unwrap().title, "a");
        assert_eq!(store.dequeue_next(guild()).unwrap().title, "b");
    }

    #[test]
    fn test_preempt_con_cola_vacia() {
        let store = QueueStore::new();
        store.insert(guild());
        assert!(store.can_stream_now(guild()));

        store.begin_transition(guild(), track("a"));
        assert!(!store.can_stream_now(guild()));
        store.finish_transition(guild());
        assert!(!store.can_stream_now(guild()));

        store.mark_draining(guild());
        assert!(store.can_stream_now(guild()));
    }

    #[test]
    fn test_recomendaciones_obsoletas_se_descartan() {
        let store = QueueStore::new();
        store.insert(guild());

        let gen_a = store.begin_transition(guild(), track("a")).unwrap();
        store.finish_transition(guild());

        // El track B arranca antes de que lleguen las recomendaciones de A.
        store.begin_transition(guild(), track("b")).unwrap();
        store.finish_transition(guild());

        assert!(!store.set_recommendations(guild(), gen_a, vec![track("rec")]));
        assert!(store.recommendation(guild(), 0).is_none());

        let gen_b = store.generation(guild()).unwrap();
        assert!(store.set_recommendations(guild(), gen_b, vec![track("rec")]));
        assert_eq!(store.recommendation(guild(), 0).unwrap().title, "rec");
    }

    #[test]
    fn test_nuevo_track_limpia_pausa_y_recomendaciones() {
        let store = QueueStore::new();
        store.insert(guild());

        let generation = store.begin_transition(guild(), track("a")).unwrap();
        store.finish_transition(guild());
        store.set_paused(guild(), true);
        store.set_recommendations(guild(), generation, vec![track("rec")]);

        store.begin_transition(guild(), track("b")).unwrap();
        store.finish_transition(guild());

        assert_eq!(store.is_paused(guild()), Some(false));
        assert!(store.recommendation(guild(), 0).is_none());
    }
}
