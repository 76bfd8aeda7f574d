use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::{i24, u24, Sample};

/// Decoded PCM, interleaved, normalized to signed 16-bit.
pub struct AudioData {
    pub samples: Vec<i16>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Single-channel copy; multi-channel frames are averaged.
    pub fn mono(&self) -> Vec<i16> {
        downmix(&self.samples, self.channels)
    }

    /// Interleaved f32 copy in -1.0..1.0 for the output device
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / 32768.0).collect()
    }
}

/// Arithmetic-mean downmix of interleaved frames
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// 8-bit unsigned to signed 16-bit
pub fn from_u8(raw: u8) -> i16 {
    ((raw as i32 - 128) * 256) as i16
}

/// 32-bit to 16-bit, truncating toward zero
pub fn from_s32(raw: i32) -> i16 {
    (raw / 65536) as i16
}

fn from_s24(raw: i24) -> i16 {
    (raw.inner() / 256) as i16
}

fn from_u16(raw: u16) -> i16 {
    (raw as i32 - 32768) as i16
}

fn from_u24(raw: u24) -> i16 {
    ((raw.inner() as i32 - 0x80_0000) / 256) as i16
}

fn from_u32(raw: u32) -> i16 {
    from_s32((raw as i64 - 0x8000_0000) as i32)
}

fn from_float(raw: f64) -> i16 {
    (raw.clamp(-1.0, 1.0) * 32767.0) as i16
}

fn interleave<S: Sample>(buf: &AudioBuffer<S>, convert: impl Fn(S) -> i16, out: &mut Vec<i16>) {
    let channels = buf.spec().channels.count();
    out.reserve(buf.frames() * channels);
    for frame in 0..buf.frames() {
        for ch in 0..channels {
            out.push(convert(buf.chan(ch)[frame]));
        }
    }
}

fn append_normalized(decoded: AudioBufferRef<'_>, out: &mut Vec<i16>) {
    match decoded {
        AudioBufferRef::U8(buf) => interleave(&*buf, from_u8, out),
        AudioBufferRef::U16(buf) => interleave(&*buf, from_u16, out),
        AudioBufferRef::U24(buf) => interleave(&*buf, from_u24, out),
        AudioBufferRef::U32(buf) => interleave(&*buf, from_u32, out),
        AudioBufferRef::S8(buf) => interleave(&*buf, |s| s as i16 * 256, out),
        AudioBufferRef::S16(buf) => interleave(&*buf, |s| s, out),
        AudioBufferRef::S24(buf) => interleave(&*buf, from_s24, out),
        AudioBufferRef::S32(buf) => interleave(&*buf, from_s32, out),
        AudioBufferRef::F32(buf) => interleave(&*buf, |s| from_float(s as f64), out),
        AudioBufferRef::F64(buf) => interleave(&*buf, from_float, out),
    }
}

pub fn decode_audio(path: &Path) -> Result<AudioData> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .context("No audio tracks found")?;

    let track_id = track.id;
    let mut channels = track.codec_params.channels.map(|c| c.count());
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;
    let bits = track.codec_params.bits_per_sample;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut samples: Vec<i16> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(err)) => {
                log::debug!("Skipping undecodable packet: {}", err);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let packet_channels = decoded.spec().channels.count();
        match channels {
            Some(expected) if expected != packet_channels => {
                anyhow::bail!(
                    "Channel count changed mid-stream ({} -> {})",
                    expected,
                    packet_channels
                );
            }
            _ => channels = Some(packet_channels),
        }
        append_normalized(decoded, &mut samples);
    }

    if samples.is_empty() {
        anyhow::bail!("No audio samples decoded from {}", path.display());
    }

    let channels = channels.unwrap_or(1);
    let audio = AudioData {
        samples,
        channels,
        sample_rate,
    };

    log::info!(
        "Decoded audio: {} frames, {}Hz, {} channel(s), {} bit, {:.2}s",
        audio.frames(),
        sample_rate,
        channels,
        bits.map_or_else(|| "?".to_string(), |b| b.to_string()),
        audio.duration()
    );

    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("treelight-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn sample_width_normalization() {
        assert_eq!(from_u8(128), 0);
        assert_eq!(from_u8(0), -32768);
        assert_eq!(from_u8(255), 32512);
        assert_eq!(from_s32(65536 * 3), 3);
        assert_eq!(from_s32(-65535), 0);
        assert_eq!(from_s32(-65536 * 2 - 5), -2);
        assert_eq!(from_s32(i32::MAX), 32767);
    }

    #[test]
    fn downmix_averages_frames() {
        let stereo = [100, 300, -50, -150, i16::MAX, i16::MAX];
        assert_eq!(downmix(&stereo, 2), vec![200, -100, i16::MAX]);
        assert_eq!(downmix(&[1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn decodes_16_bit_stereo_wav() {
        let path = temp_wav("s16");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..800i16 {
            writer.write_sample(i).unwrap();
            writer.write_sample(-i).unwrap();
        }
        writer.finalize().unwrap();

        let audio = decode_audio(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.frames(), 800);
        assert_eq!(&audio.samples[..4], &[0, 0, 1, -1]);
        assert!((audio.duration() - 0.1).abs() < 1e-9);
        assert!(audio.mono().iter().all(|&s| s == 0));
    }

    #[test]
    fn decodes_8_bit_wav_to_signed_16() {
        let path = temp_wav("u8");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [10i8, -10, 0, 127] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let audio = decode_audio(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(audio.samples, vec![2560, -2560, 0, 127 * 256]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = decode_audio(Path::new("/nonexistent/treelight/song.wav"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to open audio file"));
    }
}
