use crate::error::{PetalSoundError, Result};
use rubato::{FftFixedIn, Resampler};

/// Offline resampler for interleaved audio, used when static sounds are
/// decoded at a rate other than the one requested in [`LoadOptions`](super::LoadOptions).
pub struct AudioResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: u16,
    chunk_size: usize,
}

impl AudioResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(PetalSoundError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        if channels == 0 {
            return Err(PetalSoundError::AudioFormat(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels,
            chunk_size: chunk_size.unwrap_or(1024),
        })
    }

    pub fn resample_interleaved(&self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(interleaved.to_vec());
        }

        let channels = self.channels as usize;
        let frames = interleaved.len() / channels;
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| {
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame[ch])
                    .collect()
            })
            .collect();

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            channels,
        )
        .map_err(|e| PetalSoundError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        // FftFixedIn rounds the chunk to a multiple of its FFT size
        let chunk_size = resampler.input_frames_next();
        let mut resampled: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut position = 0;

        while position < frames {
            let take = (frames - position).min(chunk_size);

            // The last chunk is zero-padded to the fixed input size
            let chunk: Vec<Vec<f32>> = planar
                .iter()
                .map(|samples| {
                    let mut padded = vec![0.0f32; chunk_size];
                    padded[..take].copy_from_slice(&samples[position..position + take]);
                    padded
                })
                .collect();

            let waves_out = resampler
                .process(&chunk, None)
                .map_err(|e| PetalSoundError::AudioLoading(format!("Resampling error: {}", e)))?;

            for (out, wave) in resampled.iter_mut().zip(waves_out) {
                out.extend_from_slice(&wave);
            }

            position += take;
        }

        let expected = (frames as f64 * self.resample_ratio()).round() as usize;
        let new_frames = expected.min(resampled[0].len());

        let mut output = Vec::with_capacity(new_frames * channels);
        for frame_idx in 0..new_frames {
            for channel in &resampled {
                output.push(channel[frame_idx]);
            }
        }

        Ok(output)
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}
