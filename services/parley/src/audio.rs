//! PCM sample-format helpers and the optional native capture/playback workers.
//!
//! The wire carries 16 kHz little-endian PCM16 upstream and 24 kHz PCM16
//! downstream; the workers resample between those rates and whatever the
//! default devices run at. Device handling is behind the `native-audio`
//! feature so the text client builds everywhere.

use adk_realtime::LiveHandle;

/// Sample rate of the PCM the backend expects from the client.
pub const WIRE_INPUT_SAMPLE_RATE: f64 = 16000.0;
/// Sample rate of the PCM the backend sends for playback.
pub const WIRE_OUTPUT_SAMPLE_RATE: f64 = 24000.0;

/// Converts f32 samples to little-endian PCM16 bytes, clamping to range.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Converts little-endian PCM16 bytes to normalized f32 samples. A trailing
/// odd byte is discarded.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Starts the capture and playback workers for the given session.
#[cfg(feature = "native-audio")]
pub async fn start(handle: LiveHandle) -> anyhow::Result<()> {
    native::start(handle).await
}

/// Built without device support: audio mode is unavailable, text still works.
#[cfg(not(feature = "native-audio"))]
pub async fn start(_handle: LiveHandle) -> anyhow::Result<()> {
    anyhow::bail!("built without native audio support; rebuild with `--features native-audio`")
}

#[cfg(feature = "native-audio")]
mod native {
    use super::{WIRE_INPUT_SAMPLE_RATE, WIRE_OUTPUT_SAMPLE_RATE, f32_to_pcm16_bytes, pcm16_bytes_to_f32};
    use adk_realtime::{CaptureBridge, LiveHandle, PlaybackCommand};
    use anyhow::{Context, Result, anyhow, ensure};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use ringbuf::{
        HeapCons, HeapProd, HeapRb,
        traits::{Consumer, Producer, Split},
    };
    use rubato::{FastFixedIn, PolynomialDegree, Resampler};
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };
    use tokio::sync::mpsc;
    use tracing::error;

    const RING_CAPACITY: usize = 48_000;
    const CAPTURE_TICK: Duration = Duration::from_millis(40);
    const RESAMPLER_CHUNK: usize = 512;

    pub async fn start(handle: LiveHandle) -> Result<()> {
        let (capture_prod, capture_cons) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let (play_prod, play_cons) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let flush = Arc::new(AtomicBool::new(false));

        // cpal streams are not Send; they live on their own parked thread.
        let (rates_tx, rates_rx) = std::sync::mpsc::channel();
        let flush_for_output = flush.clone();
        std::thread::Builder::new()
            .name("audio-devices".to_string())
            .spawn(move || device_thread(capture_prod, play_cons, flush_for_output, rates_tx))?;
        let (input_rate, output_rate) = tokio::task::spawn_blocking(move || rates_rx.recv())
            .await
            .context("audio device thread panicked")?
            .context("audio device thread exited before reporting")?
            .map_err(|e| anyhow!(e))?;

        let (playback_tx, playback_rx) = mpsc::channel(64);
        handle.register_playback(playback_tx).await;
        tokio::spawn(feed_playback(playback_rx, play_prod, flush, output_rate));
        tokio::spawn(drain_capture(
            CaptureBridge::new(handle),
            capture_cons,
            input_rate,
        ));
        Ok(())
    }

    fn device_thread(
        capture_prod: HeapProd<f32>,
        play_cons: HeapCons<f32>,
        flush: Arc<AtomicBool>,
        rates_tx: std::sync::mpsc::Sender<Result<(f64, f64), String>>,
    ) {
        match build_streams(capture_prod, play_cons, flush) {
            Ok((_input_stream, _output_stream, rates)) => {
                let _ = rates_tx.send(Ok(rates));
                // Keep the streams alive for the life of the process.
                loop {
                    std::thread::park();
                }
            }
            Err(e) => {
                let _ = rates_tx.send(Err(e.to_string()));
            }
        }
    }

    fn build_streams(
        mut capture_prod: HeapProd<f32>,
        mut play_cons: HeapCons<f32>,
        flush: Arc<AtomicBool>,
    ) -> Result<(cpal::Stream, cpal::Stream, (f64, f64))> {
        let host = cpal::default_host();
        let input = host
            .default_input_device()
            .context("no default input device")?;
        let output = host
            .default_output_device()
            .context("no default output device")?;
        let input_config = input.default_input_config()?;
        let output_config = output.default_output_config()?;
        ensure!(
            input_config.sample_format() == cpal::SampleFormat::F32,
            "unsupported input sample format {:?}",
            input_config.sample_format()
        );
        ensure!(
            output_config.sample_format() == cpal::SampleFormat::F32,
            "unsupported output sample format {:?}",
            output_config.sample_format()
        );
        let input_rate = input_config.sample_rate().0 as f64;
        let output_rate = output_config.sample_rate().0 as f64;
        let input_channels = input_config.channels() as usize;
        let output_channels = output_config.channels() as usize;

        let input_stream = input.build_input_stream(
            &input_config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if input_channels == 1 {
                    let _ = capture_prod.push_slice(data);
                } else {
                    // Mono wire format: take the first channel of each frame.
                    for frame in data.chunks(input_channels) {
                        let _ = capture_prod.try_push(frame[0]);
                    }
                }
            },
            |e| error!(error = %e, "input stream error"),
            None,
        )?;

        let output_stream = output.build_output_stream(
            &output_config.into(),
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if flush.swap(false, Ordering::AcqRel) {
                    play_cons.clear();
                }
                if output_channels == 1 {
                    let n = play_cons.pop_slice(out);
                    out[n..].fill(0.0);
                } else {
                    for frame in out.chunks_mut(output_channels) {
                        let sample = play_cons.try_pop().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                }
            },
            |e| error!(error = %e, "output stream error"),
            None,
        )?;

        input_stream.play()?;
        output_stream.play()?;
        Ok((input_stream, output_stream, (input_rate, output_rate)))
    }

    /// Moves inbound PCM from the session into the output ring, resampling
    /// from the wire rate to the device rate. `EndOfAudio` flags the output
    /// callback to discard whatever is buffered.
    async fn feed_playback(
        mut commands: mpsc::Receiver<PlaybackCommand>,
        mut play_prod: HeapProd<f32>,
        flush: Arc<AtomicBool>,
        output_rate: f64,
    ) {
        let mut resampler = match make_resampler(WIRE_OUTPUT_SAMPLE_RATE, output_rate) {
            Ok(resampler) => resampler,
            Err(e) => {
                error!(error = %e, "failed to create playback resampler");
                return;
            }
        };
        while let Some(command) = commands.recv().await {
            match command {
                PlaybackCommand::Pcm(bytes) => {
                    let samples = pcm16_bytes_to_f32(&bytes);
                    for chunk in samples.chunks(resampler.input_frames_next()) {
                        if let Ok(res) = resampler.process(&[chunk.to_vec()], None) {
                            let _ = play_prod.push_slice(&res[0]);
                        }
                    }
                }
                PlaybackCommand::EndOfAudio => flush.store(true, Ordering::Release),
            }
        }
    }

    /// Drains captured device-rate samples on a fixed tick, resamples to the
    /// wire rate, and forwards each batch as one envelope.
    async fn drain_capture(
        mut bridge: CaptureBridge,
        mut capture_cons: HeapCons<f32>,
        input_rate: f64,
    ) {
        let mut resampler = match make_resampler(input_rate, WIRE_INPUT_SAMPLE_RATE) {
            Ok(resampler) => resampler,
            Err(e) => {
                error!(error = %e, "failed to create capture resampler");
                return;
            }
        };
        let mut tick = tokio::time::interval(CAPTURE_TICK);
        let mut buf = vec![0.0f32; 8192];
        loop {
            tick.tick().await;
            let n = capture_cons.pop_slice(&mut buf);
            if n == 0 {
                continue;
            }
            let mut resampled = Vec::new();
            for chunk in buf[..n].chunks(resampler.input_frames_next()) {
                if let Ok(res) = resampler.process(&[chunk.to_vec()], None) {
                    resampled.extend_from_slice(&res[0]);
                }
            }
            if !resampled.is_empty() {
                bridge.push(f32_to_pcm16_bytes(&resampled)).await;
            }
        }
    }

    fn make_resampler(in_rate: f64, out_rate: f64) -> Result<FastFixedIn<f32>> {
        let resampler = FastFixedIn::<f32>::new(
            out_rate / in_rate,
            1.0,
            PolynomialDegree::Cubic,
            RESAMPLER_CHUNK,
            1,
        )?;
        Ok(resampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_f32_to_pcm16_bytes() {
        let bytes = f32_to_pcm16_bytes(&[0.5, -1.0, 0.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 16384);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);

        // Out-of-range samples clamp instead of wrapping.
        let bytes = f32_to_pcm16_bytes(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);

        assert!(f32_to_pcm16_bytes(&[]).is_empty());
    }

    #[test]
    fn test_pcm16_bytes_to_f32() {
        // 16384 little endian, then -32768.
        let samples = pcm16_bytes_to_f32(&[0x00, 0x40, 0x00, 0x80]);
        assert_eq!(samples.len(), 2);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(samples[1], -1.0, epsilon = 0.0001);

        // Odd trailing byte is dropped.
        assert!(pcm16_bytes_to_f32(&[0x00]).is_empty());
        assert!(pcm16_bytes_to_f32(&[]).is_empty());
    }

    #[test]
    fn test_round_trip() {
        let original = vec![0.1f32, -0.7, 0.0, 0.99];
        let decoded = pcm16_bytes_to_f32(&f32_to_pcm16_bytes(&original));
        assert_eq!(decoded.len(), original.len());
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 0.001);
        }
    }

    #[test]
    fn test_extreme_values_stay_in_range() {
        let extreme = vec![f32::MAX, f32::MIN, f32::INFINITY, f32::NEG_INFINITY, f32::NAN];
        for sample in pcm16_bytes_to_f32(&f32_to_pcm16_bytes(&extreme)) {
            assert!((-1.0..=1.0).contains(&sample));
        }
    }
}
