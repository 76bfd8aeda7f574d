use anyhow::{Context, Result};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};

use crate::audio::decode::AudioData;

/// Audio output that the dispatcher starts in lock-step with.
pub trait PlaybackDriver {
    /// Begins audible playback. Returns once output has been handed to the
    /// device.
    fn start(&mut self) -> Result<()>;

    fn is_finished(&self) -> bool;

    fn stop(&mut self);
}

/// Plays decoded PCM on the default output device. The device is released
/// when this value is dropped.
pub struct RodioPlayback {
    sink: Sink,
    // dropping the stream closes the device
    _stream: OutputStream,
}

impl RodioPlayback {
    /// Opens the device and queues `audio` paused.
    pub fn open(audio: &AudioData) -> Result<Self> {
        let stream = OutputStreamBuilder::from_default_device()
            .context("No audio output device")?
            .open_stream_or_fallback()
            .context("Failed to open audio output stream")?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();
        sink.append(SamplesBuffer::new(
            audio.channels as u16,
            audio.sample_rate,
            audio.to_f32(),
        ));
        log::debug!(
            "Queued {:.1}s of audio ({} ch @ {} Hz)",
            audio.duration(),
            audio.channels,
            audio.sample_rate
        );

        Ok(Self {
            sink,
            _stream: stream,
        })
    }
}

impl PlaybackDriver for RodioPlayback {
    fn start(&mut self) -> Result<()> {
        self.sink.play();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}
