//! Output sinks consuming mixed PCM blocks.
//!
//! The usual sink is an external encoder (ffmpeg) reading raw 32-bit float,
//! 2-channel PCM on its stdin. WAV files can also be written in-process via
//! hound, and any `Write` can serve as a sink.

use super::block::AudioBlock;
use super::envelope::Envelope;
use crate::config::{EncoderConfig, EngineConfig};
use crate::error::RenderError;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static SINK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies an output sink attached to a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    fn next() -> Self {
        Self(SINK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum Backend {
    Encoder {
        child: Child,
        stdin: Option<ChildStdin>,
    },
    Wav(Option<WavWriter<BufWriter<File>>>),
    Writer(Box<dyn Write + Send>),
}

/// Builds the encoder command line for `path`.
///
/// The destination's extension selects the profile: `mp3` gets a fixed
/// bitrate, everything else uses the encoder's default for the format.
pub fn encoder_args(path: &Path, config: &EncoderConfig, sample_rate: u32) -> Vec<String> {
    let rate = sample_rate.to_string();
    let mut args: Vec<String> = [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "f32le",
        "-ar",
        rate.as_str(),
        "-ac",
        "2",
        "-i",
        "pipe:0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let lossy = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    if lossy {
        args.push("-b:a".to_string());
        args.push(config.lossy_bitrate.clone());
    }
    args.push(path.to_string_lossy().into_owned());
    args
}

/// One destination for the mixed output, with an optional fade envelope.
pub struct OutputSink {
    id: SinkId,
    path: PathBuf,
    backend: Backend,
    envelope: Option<Envelope>,
    bytes: Vec<u8>,
    blocks_written: u64,
    closed: bool,
}

impl OutputSink {
    fn with_backend(path: PathBuf, backend: Backend) -> Self {
        Self {
            id: SinkId::next(),
            path,
            backend,
            envelope: None,
            bytes: Vec::new(),
            blocks_written: 0,
            closed: false,
        }
    }

    /// Opens the sink `config` calls for: an in-process WAV writer for
    /// `.wav` paths when `native_wav` is set, otherwise an encoder process.
    pub fn open<P: AsRef<Path>>(path: P, config: &EngineConfig) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if config.encoder.native_wav && is_wav {
            Self::wav(path, config.sample_rate)
        } else {
            Self::spawn_encoder(path, &config.encoder, config.sample_rate)
        }
    }

    /// Spawns an encoder process writing to `path`.
    pub fn spawn_encoder<P: AsRef<Path>>(
        path: P,
        config: &EncoderConfig,
        sample_rate: u32,
    ) -> Result<Self, RenderError> {
        let path = path.as_ref().to_path_buf();
        let mut child = Command::new(&config.program)
            .args(encoder_args(&path, config, sample_rate))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| RenderError::Sink {
                path: path.clone(),
                source,
            })?;
        let stdin = child.stdin.take();
        Ok(Self::with_backend(path, Backend::Encoder { child, stdin }))
    }

    /// Writes 32-bit float stereo WAV in-process.
    pub fn wav<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self, RenderError> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec).map_err(|e| RenderError::Sink {
            path: path.clone(),
            source: hound_to_io(e),
        })?;
        Ok(Self::with_backend(path, Backend::Wav(Some(writer))))
    }

    /// Wraps any writer; it receives the raw little-endian `f32` stream.
    pub fn from_writer(label: impl Into<PathBuf>, writer: Box<dyn Write + Send>) -> Self {
        Self::with_backend(label.into(), Backend::Writer(writer))
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Attaches a fade, replacing any fade in progress.
    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = Some(envelope);
    }

    /// Writes one mixed block, scaled by the envelope if one is attached.
    ///
    /// `staging` receives the scaled copy when scaling is needed; the master
    /// block itself is never modified. Once an envelope passes its bound it
    /// is detached and later blocks go out at full level.
    pub fn write_block(
        &mut self,
        master: &AudioBlock,
        staging: &mut AudioBlock,
    ) -> Result<(), RenderError> {
        let gain = match self.envelope.as_mut() {
            Some(envelope) => {
                let gain = envelope.next_gain();
                if envelope.is_finished() {
                    self.envelope = None;
                }
                gain
            }
            None => 1.0,
        };
        let block = if gain == 1.0 {
            master
        } else {
            master.scale_into(gain, staging);
            &*staging
        };
        self.write_raw(block)?;
        self.blocks_written += 1;
        Ok(())
    }

    fn write_raw(&mut self, block: &AudioBlock) -> Result<(), RenderError> {
        let result = match &mut self.backend {
            Backend::Encoder { stdin, .. } => match stdin.as_mut() {
                Some(stdin) => {
                    self.bytes.clear();
                    block.write_le_bytes(&mut self.bytes);
                    stdin.write_all(&self.bytes)
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed")),
            },
            Backend::Wav(Some(writer)) => block
                .samples()
                .iter()
                .try_for_each(|&s| writer.write_sample(s))
                .map_err(hound_to_io),
            Backend::Wav(None) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed")),
            Backend::Writer(writer) => {
                self.bytes.clear();
                block.write_le_bytes(&mut self.bytes);
                writer.write_all(&self.bytes)
            }
        };
        result.map_err(|source| RenderError::Sink {
            path: self.path.clone(),
            source,
        })
    }

    /// Closes the input stream and waits for the encoder to finish.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), RenderError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let path = self.path.clone();
        match &mut self.backend {
            Backend::Encoder { child, stdin } => {
                drop(stdin.take());
                let status = child
                    .wait()
                    .map_err(|source| RenderError::Sink { path: path.clone(), source })?;
                if !status.success() {
                    return Err(RenderError::EncoderExit {
                        path,
                        status: status.to_string(),
                    });
                }
            }
            Backend::Wav(writer) => {
                if let Some(writer) = writer.take() {
                    writer.finalize().map_err(|e| RenderError::Sink {
                        path,
                        source: hound_to_io(e),
                    })?;
                }
            }
            Backend::Writer(writer) => {
                writer
                    .flush()
                    .map_err(|source| RenderError::Sink { path, source })?;
            }
        }
        Ok(())
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Closing output {} failed: {}", self.path.display(), e);
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("envelope", &self.envelope)
            .field("blocks_written", &self.blocks_written)
            .finish()
    }
}

fn hound_to_io(err: hound::Error) -> io::Error {
    match err {
        hound::Error::IoError(e) => e,
        other => io::Error::other(other),
    }
}

/// A shared in-memory byte sink, mostly useful for inspecting renders.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Decodes the captured stream into interleaved samples.
    pub fn samples(&self) -> Vec<f32> {
        self.contents()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_args_select_profile() {
        let config = EncoderConfig::default();
        let mp3 = encoder_args(Path::new("out/track.mp3"), &config, 44100);
        assert_eq!(&mp3[..5], &["-y", "-loglevel", "error", "-f", "f32le"]);
        assert!(mp3.windows(2).any(|w| w == ["-ar", "44100"]));
        assert!(mp3.windows(2).any(|w| w == ["-ac", "2"]));
        assert!(mp3.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert_eq!(mp3.last().unwrap(), "out/track.mp3");

        let ogg = encoder_args(Path::new("out/track.ogg"), &config, 48000);
        assert!(!ogg.iter().any(|a| a == "-b:a"));
        assert!(ogg.windows(2).any(|w| w == ["-ar", "48000"]));
    }

    #[test]
    fn test_writer_sink_receives_raw_blocks() {
        let capture = CaptureBuffer::new();
        let mut sink = OutputSink::from_writer("capture", Box::new(capture.clone()));
        let master = AudioBlock::from_samples(vec![0.5, -0.5, 0.25, 1.0]);
        let mut staging = AudioBlock::new(2);

        sink.write_block(&master, &mut staging).unwrap();
        sink.write_block(&master, &mut staging).unwrap();
        sink.close().unwrap();

        assert_eq!(sink.blocks_written(), 2);
        assert_eq!(capture.samples(), vec![0.5, -0.5, 0.25, 1.0, 0.5, -0.5, 0.25, 1.0]);
    }

    #[test]
    fn test_envelope_detaches_back_to_full_level() {
        let capture = CaptureBuffer::new();
        let mut sink = OutputSink::from_writer("capture", Box::new(capture.clone()));
        let block_seconds = 2.0 / 44100.0;
        // A fade just over two blocks long.
        sink.set_envelope(Envelope::fade_out(block_seconds * 2.0, block_seconds));

        let master = AudioBlock::from_samples(vec![1.0, 1.0, 1.0, 1.0]);
        let mut staging = AudioBlock::new(2);
        for _ in 0..5 {
            sink.write_block(&master, &mut staging).unwrap();
        }
        assert!(sink.envelope().is_none());
        // The master block is never modified by scaling.
        assert_eq!(master.samples(), &[1.0, 1.0, 1.0, 1.0]);

        let samples = capture.samples();
        assert_eq!(samples.len(), 20);
        assert_eq!(samples[0], 1.0);
        assert!(samples[4] < 1.0 && samples[4] > 0.0);
        assert!(samples[8] < samples[4]);
        // Detached: the master goes out unscaled again.
        assert!(samples[16..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_native_wav_round_trip() {
        let path = std::env::temp_dir().join(format!("splicemix-sink-{}.wav", std::process::id()));
        let mut sink = OutputSink::wav(&path, 44100).unwrap();
        let master = AudioBlock::from_samples(vec![0.5, -0.25, 0.125, 0.0]);
        let mut staging = AudioBlock::new(2);
        sink.write_block(&master, &mut staging).unwrap();
        sink.close().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.5, -0.25, 0.125, 0.0]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_encoder_is_reported() {
        let config = EncoderConfig {
            program: "splicemix-no-such-encoder".to_string(),
            ..EncoderConfig::default()
        };
        let err = OutputSink::spawn_encoder("out.ogg", &config, 44100).unwrap_err();
        assert!(matches!(err, RenderError::Sink { .. }));
    }
}
