use songbird::input::core::io::{MediaSource, ReadOnlySource};
use songbird::input::core::probe::Hint;
use songbird::input::{AudioStream, Input, LiveInput};
use std::io::BufReader;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Buffer acotado entre ffmpeg y el driver de voz. El pipe del SO más
/// este buffer dan la contrapresión; nunca se acumula audio sin límite.
const STREAM_BUFFER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no se pudo lanzar yt-dlp: {0}")]
    SpawnDownloader(#[source] std::io::Error),
    #[error("no se pudo lanzar ffmpeg: {0}")]
    SpawnTranscoder(#[source] std::io::Error),
    #[error("el pipeline no expuso stdout")]
    MissingStdout,
}

/// Cadena externa de dos etapas por track: yt-dlp baja el mejor audio
/// disponible como bytes crudos y ffmpeg lo transcodifica a ogg/opus
/// 48kHz estéreo, listo para el driver de voz.
///
/// Las dos etapas se lanzan y se matan siempre juntas; `terminate` es
/// idempotente y también corre en el drop, así ningún camino de error
/// deja procesos colgados.
pub struct TrackPipeline {
    downloader: Child,
    transcoder: Child,
}

impl TrackPipeline {
    /// Lanza ambas etapas y devuelve el `Input` listo para `play_input`.
    ///
    /// El stdout de yt-dlp se conecta directo al stdin de ffmpeg a nivel
    /// de descriptor. Los stderr van a null: cuando matamos una etapa a
    /// propósito, el EPIPE de su par no es un fallo que haya que reportar.
    pub fn spawn(
        url: &str,
        cookie_args: &[String],
        opus_bitrate: u32,
    ) -> Result<(Self, Input), PipelineError> {
        let mut downloader = Command::new("yt-dlp")
            .args(["-f", "bestaudio", "-o", "-", "--no-playlist", "--quiet", "--no-warnings"])
            .args(cookie_args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(PipelineError::SpawnDownloader)?;

        let raw_audio = match downloader.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = downloader.kill();
                let _ = downloader.wait();
                return Err(PipelineError::MissingStdout);
            }
        };

        let bitrate = format!("{}k", opus_bitrate / 1000);
        let transcoder = Command::new("ffmpeg")
            .args(["-analyzeduration", "0", "-probesize", "32768"])
            .args(["-i", "pipe:0", "-loglevel", "0"])
            .args(["-acodec", "libopus", "-f", "ogg"])
            .args(["-ar", "48000", "-ac", "2", "-b:a", &bitrate])
            .args(["-vbr", "on", "-compression_level", "10"])
            .args(["-application", "audio", "-frame_duration", "20"])
            .arg("pipe:1")
            .stdin(Stdio::from(raw_audio))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut transcoder = match transcoder {
            Ok(child) => child,
            Err(e) => {
                let _ = downloader.kill();
                let _ = downloader.wait();
                return Err(PipelineError::SpawnTranscoder(e));
            }
        };

        let encoded = match transcoder.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let mut pipeline = Self {
                    downloader,
                    transcoder,
                };
                pipeline.terminate();
                return Err(PipelineError::MissingStdout);
            }
        };

        let reader = BufReader::with_capacity(STREAM_BUFFER_BYTES, encoded);
        let source: Box<dyn MediaSource> = Box::new(ReadOnlySource::new(reader));
        let mut hint = Hint::new();
        hint.mime_type("audio/ogg");

        let stream = AudioStream {
            input: source,
            hint: Some(hint),
        };
        let input = Input::Live(LiveInput::Raw(stream), None);

        Ok((
            Self {
                downloader,
                transcoder,
            },
            input,
        ))
    }

    /// Mata las dos etapas incondicionalmente y las cosecha. Seguro de
    /// llamar más de una vez; los procesos ya muertos se ignoran.
    pub fn terminate(&mut self) {
        for stage in [&mut self.downloader, &mut self.transcoder] {
            let _ = stage.kill();
            let _ = stage.wait();
        }
        debug!("Pipeline terminado (yt-dlp + ffmpeg)");
    }

    #[cfg(test)]
    pub(crate) fn from_children(downloader: Child, transcoder: Child) -> Self {
        Self {
            downloader,
            transcoder,
        }
    }
}

impl Drop for TrackPipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}
