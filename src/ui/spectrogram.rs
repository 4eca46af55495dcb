//! Spectrogram rendering: Hamming-windowed FFT columns on a log-frequency
//! axis, colorized through a fixed palette.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use reqwest::blocking::Client;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::config::SpectrogramConfig;
use crate::media::error::MediaError;
use crate::media::source::{MediaLocation, open_location};

const LOWEST_FREQ: f64 = 100.0;
const DB_RANGE: f32 = 110.0;

const COLOR_STOPS: [[u8; 3]; 7] = [
    [0, 0, 0],
    [14, 17, 16],
    [40, 50, 76],
    [90, 180, 100],
    [224, 224, 44],
    [255, 60, 30],
    [255, 255, 255],
];

#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub image: RgbaImage,
}

/// 256 colors interpolated linearly between the stops.
pub fn palette() -> Vec<[u8; 3]> {
    let segments = (COLOR_STOPS.len() - 1) as f64;
    (0..256)
        .map(|i| {
            let index = i as f64 * segments / 255.0;
            let lo = (index.floor() as usize).min(COLOR_STOPS.len() - 2);
            let alpha = index - lo as f64;
            let (a, b) = (COLOR_STOPS[lo], COLOR_STOPS[lo + 1]);
            let mix = |k: usize| ((1.0 - alpha) * a[k] as f64 + alpha * b[k] as f64).round() as u8;
            [mix(0), mix(1), mix(2)]
        })
        .collect()
}

/// For each image row (bottom up), the FFT bin below it and how far
/// towards the next bin the row's frequency sits.
fn row_bins(height: u32, fft_size: usize, sample_rate: u32) -> Vec<(usize, f32)> {
    let nyquist = sample_rate as f64 / 2.0;
    let bins = fft_size / 2;

    (0..height)
        .filter_map(|y| {
            let freq = row_frequency(y, height, sample_rate);
            let bin = freq / nyquist * (bins as f64 + 1.0);
            (bin < bins as f64).then(|| (bin as usize, bin.fract() as f32))
        })
        .collect()
}

fn row_frequency(y: u32, height: u32, sample_rate: u32) -> f64 {
    let nyquist = sample_rate as f64 / 2.0;
    let lo = LOWEST_FREQ.min(nyquist / 2.0).log10();
    let hi = nyquist.log10();
    10f64.powf(lo + y as f64 / (height as f64 - 1.0) * (hi - lo))
}

/// Consumes mono samples and produces one spectrum per image column. The
/// total frame count must be known up front to place the columns.
pub struct SpectrogramBuilder {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    width: u32,
    height: u32,
    sample_rate: u32,
    total_frames: u64,
    history: VecDeque<f32>,
    seen: u64,
    next_column: u32,
    max_level: f32,
    spectra: Vec<Vec<f32>>,
}

impl SpectrogramBuilder {
    pub fn new(config: SpectrogramConfig, sample_rate: u32, total_frames: u64) -> Self {
        let fft_size = config.fft_size;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        let window = (0..fft_size)
            .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f32 / (fft_size as f32 - 1.0)).cos())
            .collect();

        Self {
            fft,
            fft_size,
            window,
            width: config.width,
            height: config.height,
            sample_rate,
            total_frames,
            history: VecDeque::with_capacity(fft_size),
            seen: 0,
            next_column: 0,
            max_level: 0.0,
            spectra: Vec::with_capacity(config.width as usize),
        }
    }

    fn seek_point(&self, column: u32) -> u64 {
        (column as u128 * self.total_frames as u128 / self.width as u128) as u64
    }

    /// Index one past the last sample a column's window covers.
    fn window_end(&self, column: u32) -> u64 {
        self.seek_point(column) + self.fft_size as u64 / 2
    }

    pub fn push(&mut self, sample: f32) {
        self.max_level = self.max_level.max(sample.abs());
        self.push_raw(sample);
    }

    fn push_raw(&mut self, sample: f32) {
        if self.history.len() == self.fft_size {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.seen += 1;

        while self.next_column < self.width && self.seen >= self.window_end(self.next_column) {
            self.emit_column();
        }
    }

    fn emit_column(&mut self) {
        let pad = self.fft_size - self.history.len();
        let mut buffer: Vec<Complex<f32>> = std::iter::repeat_n(0.0, pad)
            .chain(self.history.iter().copied())
            .zip(&self.window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);
        self.spectra
            .push(buffer[..=self.fft_size / 2].iter().map(|c| c.norm()).collect());
        self.next_column += 1;
    }

    /// Flush the trailing columns and return each column's level per row,
    /// bottom up, normalized to `[0, 1]`.
    pub fn levels(mut self) -> Vec<Vec<f32>> {
        let tail = self.fft_size / 2;
        for _ in 0..tail {
            if self.next_column >= self.width {
                break;
            }
            self.push_raw(0.0);
        }
        while self.spectra.len() < self.width as usize {
            self.spectra.push(vec![0.0; self.fft_size / 2 + 1]);
        }

        // A DC signal through the window peaks at the window's sum.
        let max_fft: f32 = self.window.iter().sum();
        let scale = if self.max_level > 0.0 {
            1.0 / self.max_level / max_fft
        } else {
            1.0
        };

        let rows = row_bins(self.height, self.fft_size, self.sample_rate);
        self.spectra
            .iter()
            .map(|spectrum| {
                let db: Vec<f32> = spectrum
                    .iter()
                    .map(|m| {
                        let level = 20.0 * (m * scale + 1e-30).log10();
                        (level.clamp(-DB_RANGE, 0.0) + DB_RANGE) / DB_RANGE
                    })
                    .collect();

                let mut column: Vec<f32> = rows
                    .iter()
                    .map(|&(bin, alpha)| (1.0 - alpha) * db[bin] + alpha * db[bin + 1])
                    .collect();
                column.resize(self.height as usize, 0.0);
                column
            })
            .collect()
    }

    pub fn finish(self) -> Spectrogram {
        let (width, height) = (self.width, self.height);
        paint(&self.levels(), width, height)
    }
}

fn paint(levels: &[Vec<f32>], width: u32, height: u32) -> Spectrogram {
    let palette = palette();
    let mut image = RgbaImage::new(width, height);

    for (x, column) in levels.iter().enumerate() {
        for (y, level) in column.iter().enumerate() {
            let [r, g, b] = palette[(level.clamp(0.0, 1.0) * 255.0) as usize];
            image.put_pixel(x as u32, height - 1 - y as u32, Rgba([r, g, b, 255]));
        }
    }

    Spectrogram { image }
}

/// Decode `location` and render its spectrogram. Blocks for as long as the
/// whole file takes to fetch and decode.
pub fn build(
    client: &Client,
    location: &MediaLocation,
    config: SpectrogramConfig,
) -> Result<Spectrogram, MediaError> {
    let (source, _) = open_location(client, location)?;
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = location.extension() {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| MediaError::UnsupportedMediaType(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MediaError::UnsupportedMediaType("no audio track found".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| MediaError::UnsupportedMediaType(e.to_string()))?;

    let mut sample_rate = params.sample_rate;
    let mut builder = match (sample_rate, params.n_frames) {
        (Some(rate), Some(frames)) => Some(SpectrogramBuilder::new(config, rate, frames)),
        _ => None,
    };
    // Without a frame count the columns cannot be placed while streaming,
    // so the whole mono signal is kept instead.
    let mut pending: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(MediaError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(MediaError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::new(decoded.capacity() as u64, spec)
        });
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);

        // Left channel only.
        let left = buf.samples().iter().step_by(channels).copied();
        match builder {
            Some(ref mut b) => left.for_each(|s| b.push(s)),
            None => pending.extend(left),
        }
    }

    let builder = match builder {
        Some(b) => b,
        None => {
            let rate = sample_rate
                .ok_or_else(|| MediaError::Spectrogram("unknown sample rate".to_string()))?;
            let mut b = SpectrogramBuilder::new(config, rate, pending.len() as u64);
            pending.into_iter().for_each(|s| b.push(s));
            b
        }
    };

    debug!(%location, "spectrogram rendered");
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32, fft_size: usize) -> SpectrogramConfig {
        SpectrogramConfig {
            width,
            height,
            fft_size,
        }
    }

    #[test]
    fn palette_runs_from_black_to_white() {
        let palette = palette();
        assert_eq!(palette.len(), 256);
        assert_eq!(palette[0], [0, 0, 0]);
        assert_eq!(palette[255], [255, 255, 255]);
    }

    #[test]
    fn rows_stay_below_nyquist() {
        let rows = row_bins(64, 512, 8000);
        assert!(!rows.is_empty());
        assert!(rows.len() <= 64);
        assert!(rows.iter().all(|&(bin, alpha)| bin < 256 && (0.0..1.0).contains(&alpha)));
        assert!(rows.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn pure_tone_lights_its_row() {
        let rate = 8000;
        let total = 8000u64;
        let tone = 1000.0f32;
        let (width, height) = (8, 48);

        let mut builder = SpectrogramBuilder::new(config(width, height, 512), rate, total);
        for n in 0..total {
            builder.push((2.0 * PI * tone * n as f32 / rate as f32).sin());
        }

        let levels = builder.levels();
        assert_eq!(levels.len(), width as usize);

        let column = &levels[width as usize / 2];
        let (loudest, _) = column
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (y, &l)| if l > best.1 { (y, l) } else { best });

        let freq = row_frequency(loudest as u32, height, rate);
        assert!(
            (freq - tone as f64).abs() / (tone as f64) < 0.2,
            "loudest row sits at {freq} Hz"
        );
    }

    #[test]
    fn silence_paints_the_darkest_color() {
        let mut builder = SpectrogramBuilder::new(config(4, 8, 64), 8000, 400);
        for _ in 0..400 {
            builder.push(0.0);
        }
        let spectrogram = builder.finish();
        assert_eq!(spectrogram.image.dimensions(), (4, 8));
        assert!(spectrogram.image.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn short_input_still_fills_every_column() {
        let mut builder = SpectrogramBuilder::new(config(16, 8, 64), 8000, 1000);
        for n in 0..10 {
            builder.push(n as f32 / 10.0);
        }
        assert_eq!(builder.levels().len(), 16);
    }
}
