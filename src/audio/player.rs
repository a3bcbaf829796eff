use anyhow::Result;
use dashmap::DashMap;
use serenity::builder::{CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use songbird::tracks::TrackHandle;
use songbird::{
    Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::pipeline::TrackPipeline;
use crate::audio::queue::QueueStore;
use crate::audio::track::Track;
use crate::config::Config;
use crate::sources::Resolver;
use crate::ui::{buttons, embeds};

/// Mitad de recursos de una sesión: conexión de voz, handle del track
/// sonando, procesos externos del track actual y el mensaje de Now
/// Playing. El `Player` es su único dueño; la mitad de datos vive en
/// [`QueueStore`].
struct Session {
    call: Arc<Mutex<Call>>,
    text_channel: ChannelId,
    track_handle: Option<TrackHandle>,
    pipeline: Option<TrackPipeline>,
    now_playing: Option<MessageId>,
}

/// Controlador del pipeline de reproducción, una máquina de estados por
/// guild: Idle → Streaming ⇄ Paused → Draining → Destroyed.
///
/// Todas las mutaciones pasan por métodos de esta struct; los eventos de
/// songbird (fin de track, error, desconexión) entran por los watchers
/// de abajo y desembocan en [`Player::advance_queue`], el único lugar
/// que decide qué pasa cuando un track termina, por el motivo que sea.
pub struct Player {
    manager: Arc<Songbird>,
    http: Arc<Http>,
    store: QueueStore,
    resolver: Resolver,
    sessions: DashMap<GuildId, Session>,
    idle_timers: DashMap<GuildId, JoinHandle<()>>,
    idle_timeout: Duration,
    reconnect_grace: Duration,
    opus_bitrate: u32,
    max_queue_size: usize,
}

impl Player {
    pub fn new(
        manager: Arc<Songbird>,
        http: Arc<Http>,
        resolver: Resolver,
        config: &Config,
    ) -> Self {
        Self {
            manager,
            http,
            store: QueueStore::new(),
            resolver,
            sessions: DashMap::new(),
            idle_timers: DashMap::new(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            reconnect_grace: Duration::from_secs(config.reconnect_grace_secs),
            opus_bitrate: config.opus_bitrate,
            max_queue_size: config.max_queue_size,
        }
    }

    /// Resuelve una query a un track. `None` = sin resultados, nunca error.
    pub async fn search(&self, query: &str) -> Option<Track> {
        self.resolver.search(query).await
    }

    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.store.contains(guild_id)
    }

    pub fn current_track(&self, guild_id: GuildId) -> Option<Track> {
        self.store.current(guild_id)
    }

    pub fn queue_snapshot(&self, guild_id: GuildId) -> (Option<Track>, Vec<Track>) {
        (
            self.store.current(guild_id),
            self.store.pending_snapshot(guild_id),
        )
    }

    pub fn clear_queue(&self, guild_id: GuildId) -> usize {
        self.store.clear_pending(guild_id)
    }

    pub fn recommendation(&self, guild_id: GuildId, index: usize) -> Option<Track> {
        self.store.recommendation(guild_id, index)
    }

    /// Entrada principal: une el bot al canal de voz si hace falta y
    /// reproduce o encola el track.
    ///
    /// La decisión encolar-vs-inmediato es la garantía de orden clave: un
    /// pedido que llega cuando no suena nada salta directo al stream, no
    /// queda esperando detrás de una cola vacía.
    ///
    /// Devuelve `Ok(false)` si el track fue rechazado por cola llena.
    pub async fn join_and_play(
        self: &Arc<Self>,
        guild_id: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        track: Track,
    ) -> Result<bool> {
        if self.store.contains(guild_id) {
            return Ok(self.enqueue_or_stream(guild_id, track).await);
        }

        let call = self.manager.join(guild_id, voice_channel).await?;
        self.store.insert(guild_id);
        self.sessions.insert(
            guild_id,
            Session {
                call: call.clone(),
                text_channel,
                track_handle: None,
                pipeline: None,
                now_playing: None,
            },
        );

        {
            let mut handler = call.lock().await;
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectWatcher {
                    player: Arc::clone(self),
                    guild_id,
                    call: call.clone(),
                },
            );
        }

        info!("🔊 Sesión nueva en guild {}", guild_id);
        self.stream_track(guild_id, track, None).await;
        Ok(true)
    }

    /// Para una sesión ya existente: cancela el reaper de inactividad y
    /// reproduce ya mismo si no suena nada, si no encola. Devuelve false
    /// si el guild no tiene sesión o la cola está llena.
    pub async fn enqueue_or_stream(self: &Arc<Self>, guild_id: GuildId, track: Track) -> bool {
        if !self.store.contains(guild_id) {
            return false;
        }
        self.cancel_idle_timer(guild_id);

        if self.store.can_stream_now(guild_id) {
            self.stream_track(guild_id, track, None).await;
        } else {
            if self.store.pending_len(guild_id) >= self.max_queue_size {
                warn!("Cola llena en guild {}, se descarta el track", guild_id);
                return false;
            }
            self.store.enqueue(guild_id, track);
        }
        true
    }

    /// Arranca el stream de `track`, matando antes cualquier pipeline del
    /// track anterior. En fallo de spawn avanza la cola en vez de trabarla.
    ///
    /// Devuelve un future boxeado para cortar el ciclo de tipos opacos de
    /// la recursión async stream_track → advance_queue → stream_track.
    fn stream_track<'a>(
        self: &'a Arc<Self>,
        guild_id: GuildId,
        track: Track,
        previous: Option<Track>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let Some(generation) = self.store.begin_transition(guild_id, track.clone()) else {
            // Otro arranque ganó la carrera. El track no se pierde: vuelve
            // a la cabeza de la cola y sale cuando termine el que ganó.
            self.store.requeue_front(guild_id, track);
            return;
        };

        // Matar el pipeline anterior y soltar el handle viejo antes de
        // reemplazarlos; los procesos ya muertos se ignoran.
        let staged = {
            match self.sessions.get_mut(&guild_id) {
                Some(mut session) => {
                    if let Some(mut pipeline) = session.pipeline.take() {
                        pipeline.terminate();
                    }
                    if let Some(handle) = session.track_handle.take() {
                        let _ = handle.stop();
                    }
                    Some((
                        session.call.clone(),
                        session.text_channel,
                        session.now_playing.take(),
                    ))
                }
                None => None,
            }
        };
        let Some((call, text_channel, old_message)) = staged else {
            // La sesión se destruyó entre medio; no hay nada que arrancar.
            self.store.abort_transition(guild_id);
            return;
        };

        // Convertir el Now Playing anterior en "reproducido".
        if let (Some(message_id), Some(prev)) = (old_message, previous.as_ref()) {
            self.mark_played(text_channel, message_id, prev).await;
        }

        info!("🎵 Streaming: \"{}\" ({})", track.title, track.url);

        match TrackPipeline::spawn(&track.url, self.resolver.cookie_args(), self.opus_bitrate) {
            Ok((pipeline, input)) => {
                let handle = {
                    let mut call_lock = call.lock().await;
                    call_lock.play_input(input)
                };

                let watcher = TrackLifecycleWatcher {
                    player: Arc::clone(self),
                    guild_id,
                    generation,
                };
                let _ = handle.add_event(Event::Track(TrackEvent::End), watcher.clone());
                let _ = handle.add_event(Event::Track(TrackEvent::Error), watcher);

                match self.sessions.get_mut(&guild_id) {
                    Some(mut session) => {
                        session.pipeline = Some(pipeline);
                        session.track_handle = Some(handle);
                    }
                    None => {
                        // destroy() ganó la carrera: limpiar lo recién creado.
                        let _ = handle.stop();
                        drop(pipeline);
                        self.store.abort_transition(guild_id);
                        return;
                    }
                }

                self.store.finish_transition(guild_id);
                self.send_now_playing(guild_id, text_channel, &track).await;

                // Recomendaciones en segundo plano, atadas a esta
                // generación; si el track actual cambió cuando lleguen,
                // se descartan.
                let player = Arc::clone(self);
                let source_url = track.url.clone();
                tokio::spawn(async move {
                    let recommendations = player.resolver.fetch_recommendations(&source_url).await;
                    if recommendations.is_empty() {
                        return;
                    }
                    if !player
                        .store
                        .set_recommendations(guild_id, generation, recommendations.clone())
                    {
                        debug!("Recomendaciones obsoletas descartadas en guild {}", guild_id);
                        return;
                    }
                    player
                        .refresh_now_playing_components(guild_id, &recommendations)
                        .await;
                });
            }
            Err(e) => {
                error!("❌ Pipeline para \"{}\" falló: {}", track.title, e);
                self.store.abort_transition(guild_id);
                // Avance en una task aparte para no recursar el arranque.
                let player = Arc::clone(self);
                tokio::spawn(async move {
                    player.advance_queue(guild_id).await;
                });
            }
        }
        })
    }

    /// Único punto de decisión tras el fin de un track, por cualquier
    /// motivo: saca el siguiente de la cola o entra en drenaje y arma el
    /// reaper de inactividad. No hace nada si hay un reemplazo en curso.
    pub async fn advance_queue(self: &Arc<Self>, guild_id: GuildId) {
        if !self.store.should_advance(guild_id) {
            debug!("advance_queue ignorado en guild {} (transición en curso)", guild_id);
            return;
        }

        let previous = self.store.current(guild_id);
        match self.store.dequeue_next(guild_id) {
            Some(next) => self.stream_track(guild_id, next, previous).await,
            None => self.enter_draining(guild_id, previous).await,
        }
    }

    async fn enter_draining(self: &Arc<Self>, guild_id: GuildId, last: Option<Track>) {
        if !self.store.contains(guild_id) {
            return;
        }

        // El track terminó: cosechar sus procesos ya mismo, no al final de
        // la ventana de inactividad. Sin track actual no hay procesos vivos.
        let message = self.sessions.get_mut(&guild_id).and_then(|mut session| {
            if let Some(mut pipeline) = session.pipeline.take() {
                pipeline.terminate();
            }
            session.track_handle = None;
            session.now_playing.take().map(|id| (session.text_channel, id))
        });
        if let (Some((channel, message_id)), Some(last)) = (message, last.as_ref()) {
            self.mark_played(channel, message_id, last).await;
        }

        self.store.mark_draining(guild_id);
        self.schedule_idle_disconnect(guild_id);
        debug!("Guild {} en drenaje, reaper armado", guild_id);
    }

    /// Arma el reaper: si nadie pide nada en la ventana configurada, la
    /// sesión se desmonta entera. La ventana arranca en cada drenaje
    /// (cancelar y rearmar); cualquier track nuevo la cancela.
    fn schedule_idle_disconnect(self: &Arc<Self>, guild_id: GuildId) {
        self.cancel_idle_timer(guild_id);
        if !self.store.contains(guild_id) {
            return;
        }

        let player = Arc::clone(self);
        let delay = self.idle_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("💤 Timeout de inactividad en guild {}, desconectando", guild_id);
            // Sacarse a sí mismo del mapa antes del destroy, para que el
            // cancel de adentro no aborte esta misma task a mitad de camino.
            player.idle_timers.remove(&guild_id);
            player.destroy(guild_id).await;
        });
        self.idle_timers.insert(guild_id, task);
    }

    fn cancel_idle_timer(&self, guild_id: GuildId) {
        if let Some((_, task)) = self.idle_timers.remove(&guild_id) {
            task.abort();
        }
    }

    /// Pausa la sesión. No-op (false) sin sesión o si ya estaba en pausa.
    /// Los procesos externos siguen corriendo y bufereando.
    pub async fn pause(&self, guild_id: GuildId) -> bool {
        if self.store.is_paused(guild_id) != Some(false) {
            return false;
        }
        let handle = self
            .sessions
            .get(&guild_id)
            .and_then(|session| session.track_handle.clone());
        let Some(handle) = handle else { return false };
        if handle.pause().is_err() {
            return false;
        }
        self.store.set_paused(guild_id, true);
        info!("⏸️ Pausado en guild {}", guild_id);
        true
    }

    /// Simétrico de [`Player::pause`].
    pub async fn resume(&self, guild_id: GuildId) -> bool {
        if self.store.is_paused(guild_id) != Some(true) {
            return false;
        }
        let handle = self
            .sessions
            .get(&guild_id)
            .and_then(|session| session.track_handle.clone());
        let Some(handle) = handle else { return false };
        if handle.play().is_err() {
            return false;
        }
        self.store.set_paused(guild_id, false);
        info!("▶️ Reanudado en guild {}", guild_id);
        true
    }

    /// Mata el pipeline del track actual y frena el handle; el evento de
    /// fin resultante es el que dispara el avance de cola. No-op sin sesión.
    pub async fn skip(&self, guild_id: GuildId) -> bool {
        let handle = match self.sessions.get_mut(&guild_id) {
            Some(mut session) => {
                if let Some(mut pipeline) = session.pipeline.take() {
                    pipeline.terminate();
                }
                session.track_handle.take()
            }
            None => return false,
        };
        if let Some(handle) = handle {
            let _ = handle.stop();
        }
        info!("⏭️ Skip en guild {}", guild_id);
        true
    }

    /// Desmonta la sesión entera: reaper, procesos, track, conexión de
    /// voz y entrada del store. Idempotente; sin sesión es un no-op.
    pub async fn destroy(&self, guild_id: GuildId) {
        self.cancel_idle_timer(guild_id);

        if let Some((_, mut session)) = self.sessions.remove(&guild_id) {
            if let Some(mut pipeline) = session.pipeline.take() {
                pipeline.terminate();
            }
            if let Some(handle) = session.track_handle.take() {
                let _ = handle.stop();
            }
        }

        if self.store.remove(guild_id) {
            info!("🛑 Sesión destruida en guild {}", guild_id);
        }

        if let Err(e) = self.manager.remove(guild_id).await {
            debug!("Sin conexión de voz que liberar en guild {}: {}", guild_id, e);
        }
    }

    // Mensajería: siempre mejor esfuerzo, un fallo acá nunca afecta la
    // reproducción.

    async fn send_now_playing(&self, guild_id: GuildId, channel: ChannelId, track: &Track) {
        let message = CreateMessage::new()
            .embed(embeds::now_playing(track))
            .components(buttons::player_controls());

        match channel.send_message(&self.http, message).await {
            Ok(sent) => {
                if let Some(mut session) = self.sessions.get_mut(&guild_id) {
                    session.now_playing = Some(sent.id);
                }
            }
            Err(e) => warn!("No se pudo enviar el Now Playing: {}", e),
        }
    }

    async fn mark_played(&self, channel: ChannelId, message_id: MessageId, track: &Track) {
        let edit = EditMessage::new()
            .embed(embeds::played(track))
            .components(Vec::new());
        if let Err(e) = channel.edit_message(&self.http, message_id, edit).await {
            warn!("No se pudo editar el Now Playing anterior: {}", e);
        }
    }

    async fn refresh_now_playing_components(&self, guild_id: GuildId, recommendations: &[Track]) {
        let target = self
            .sessions
            .get(&guild_id)
            .and_then(|session| session.now_playing.map(|id| (session.text_channel, id)));
        let Some((channel, message_id)) = target else { return };

        let edit = EditMessage::new()
            .components(buttons::player_controls_with_recommendations(recommendations));
        if let Err(e) = channel.edit_message(&self.http, message_id, edit).await {
            warn!("No se pudieron agregar los botones de recomendación: {}", e);
        }
    }
}

/// Fin o error del track en curso. Ambos desembocan en `advance_queue`;
/// los eventos de una generación vieja (un pipeline matado a propósito)
/// se descartan en silencio.
#[derive(Clone)]
struct TrackLifecycleWatcher {
    player: Arc<Player>,
    guild_id: GuildId,
    generation: u64,
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackLifecycleWatcher {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.player.store.generation(self.guild_id) != Some(self.generation) {
            debug!("Evento de track obsoleto en guild {}, descartado", self.guild_id);
            return None;
        }

        self.player.advance_queue(self.guild_id).await;
        None
    }
}

/// Conexión de voz perdida: se da una ventana de gracia acotada para la
/// reconexión automática; si no vuelve, la sesión se desmonta.
struct DisconnectWatcher {
    player: Arc<Player>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
}

#[async_trait::async_trait]
impl VoiceEventHandler for DisconnectWatcher {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);

        let player = Arc::clone(&self.player);
        let call = Arc::clone(&self.call);
        let guild_id = self.guild_id;
        let grace = self.player.reconnect_grace;

        // En una task aparte para no bloquear el despacho de eventos del
        // driver durante la espera.
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let reconnected = { call.lock().await.current_connection().is_some() };
            if !reconnected {
                warn!("Conexión no recuperada en guild {}, destruyendo sesión", guild_id);
                player.destroy(guild_id).await;
            }
        });

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_player(idle_timeout: Duration, max_queue_size: usize) -> Arc<Player> {
        let manager = Songbird::serenity();
        // Sin esto, `manager.get_or_insert` panickea por falta de datos de
        // cliente; no hay gateway real en los tests.
        manager.initialise_client_data(1, serenity::model::id::UserId::new(1));
        Arc::new(Player {
            manager,
            http: Arc::new(Http::new("")),
            store: QueueStore::new(),
            resolver: Resolver::new(Vec::new()),
            sessions: DashMap::new(),
            idle_timers: DashMap::new(),
            idle_timeout,
            reconnect_grace: Duration::from_secs(5),
            opus_bitrate: 128_000,
            max_queue_size,
        })
    }

    fn guild() -> GuildId {
        GuildId::new(99)
    }

    #[tokio::test]
    async fn test_comandos_sin_sesion_son_noop() {
        let player = test_player(Duration::from_secs(300), 100);

        assert!(!player.pause(guild()).await);
        assert!(!player.resume(guild()).await);
        assert!(!player.skip(guild()).await);
        assert!(!player.enqueue_or_stream(guild(), sample_track()).await);
        assert_eq!(player.clear_queue(guild()), 0);
    }

    #[tokio::test]
    async fn test_destroy_es_idempotente() {
        let player = test_player(Duration::from_secs(300), 100);

        player.destroy(guild()).await;
        player.destroy(guild()).await;

        player.store.insert(guild());
        player.destroy(guild()).await;
        assert!(!player.has_session(guild()));
        player.destroy(guild()).await;
    }

    #[tokio::test]
    async fn test_reaper_desmonta_tras_la_ventana() {
        let player = test_player(Duration::from_millis(50), 100);
        player.store.insert(guild());

        player.schedule_idle_disconnect(guild());
        assert!(player.has_session(guild()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!player.has_session(guild()));
        assert!(player.idle_timers.get(&guild()).is_none());
    }

    #[tokio::test]
    async fn test_reaper_cancelado_no_dispara() {
        let player = test_player(Duration::from_millis(50), 100);
        player.store.insert(guild());

        player.schedule_idle_disconnect(guild());
        player.cancel_idle_timer(guild());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(player.has_session(guild()));
    }

    #[tokio::test]
    async fn test_rearmar_reaper_reinicia_la_ventana() {
        let player = test_player(Duration::from_millis(200), 100);
        player.store.insert(guild());

        player.schedule_idle_disconnect(guild());
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Un nuevo drenaje cancela y rearma: la ventana cuenta desde acá.
        player.schedule_idle_disconnect(guild());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(player.has_session(guild()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!player.has_session(guild()));
    }

    #[tokio::test]
    async fn test_arranque_perdedor_no_pierde_el_track() {
        let player = test_player(Duration::from_secs(300), 100);
        player.store.insert(guild());

        // Una transición ya en vuelo: el arranque nuevo pierde la carrera.
        player
            .store
            .begin_transition(guild(), named_track("ganador"))
            .unwrap();
        player.stream_track(guild(), named_track("perdedor"), None).await;

        assert_eq!(
            player.store.dequeue_next(guild()).unwrap().title,
            "perdedor"
        );
    }

    #[tokio::test]
    async fn test_cola_llena_rechaza_el_track() {
        let player = test_player(Duration::from_secs(300), 1);
        player.store.insert(guild());

        // Con algo sonando los pedidos van a la cola.
        player
            .store
            .begin_transition(guild(), named_track("actual"))
            .unwrap();
        player.store.finish_transition(guild());

        assert!(player.enqueue_or_stream(guild(), named_track("a")).await);
        assert!(!player.enqueue_or_stream(guild(), named_track("b")).await);
        assert_eq!(player.store.pending_len(guild()), 1);
    }

    #[tokio::test]
    async fn test_drenaje_cosecha_el_pipeline() {
        let player = test_player(Duration::from_secs(300), 100);
        player.store.insert(guild());

        let downloader = sleeper();
        let transcoder = sleeper();
        let pids = [downloader.id(), transcoder.id()];
        player.sessions.insert(
            guild(),
            Session {
                call: player.manager.get_or_insert(guild()),
                text_channel: ChannelId::new(1),
                track_handle: None,
                pipeline: Some(TrackPipeline::from_children(downloader, transcoder)),
                now_playing: None,
            },
        );

        player.enter_draining(guild(), None).await;

        let session = player.sessions.get(&guild()).unwrap();
        assert!(session.pipeline.is_none());
        assert!(session.track_handle.is_none());
        drop(session);
        for pid in pids {
            assert!(!pid_alive(pid));
        }
    }

    fn sample_track() -> Track {
        named_track("test")
    }

    fn named_track(title: &str) -> Track {
        Track::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            title.into(),
            "3:00".into(),
            None,
        )
    }

    fn sleeper() -> std::process::Child {
        std::process::Command::new("sleep")
            .arg("30")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .spawn()
            .expect("sleep disponible en el entorno de test")
    }

    fn pid_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .expect("kill disponible en el entorno de test")
            .success()
    }
}
