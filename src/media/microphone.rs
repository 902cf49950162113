//! The default input device as a [`CaptureDevice`].
//!
//! cpal streams are not `Send`, so each open stream lives on its own thread
//! until the [`ChannelSource`] handed to the pump is dropped.

use crate::config::CaptureConstraints;
use crate::error::{IntercomError, Result};
use crate::media::capture::{CaptureDevice, ChannelSource, PcmSource};
use crate::media::pcm::{downmix, resample};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, Device, FromSample, InputCallbackInfo, Sample, SampleFormat, SampleRate,
    SizedSample, Stream, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Most audio kept queued between the capture callback and the packet pump.
const MAX_BACKLOG_MS: usize = 200;

/// Captures from the host's default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

#[async_trait]
impl CaptureDevice for CpalMicrophone {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn PcmSource>> {
        let constraints = *constraints;
        let (chunks_tx, chunks_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::Builder::new()
            .name("intercom-mic".into())
            .spawn(move || run_capture(constraints, chunks_tx, stop_rx, ready_tx))
            .map_err(|e| IntercomError::MediaAccess(format!("capture thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| IntercomError::MediaAccess("capture thread exited".into()))??;

        let backlog = constraints.sample_rate as usize * MAX_BACKLOG_MS / 1000;
        Ok(Box::new(ChannelSource::new(chunks_rx, stop_tx, backlog)))
    }
}

fn run_capture(
    constraints: CaptureConstraints,
    chunks: Sender<Vec<i16>>,
    stop: Receiver<()>,
    ready: oneshot::Sender<Result<()>>,
) {
    let stream = match open_stream(&constraints, chunks) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // returns once the source (and with it the sender) is dropped
    let _ = stop.recv();
    drop(stream);
    debug!("microphone closed");
}

fn open_stream(constraints: &CaptureConstraints, chunks: Sender<Vec<i16>>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| IntercomError::MediaAccess("no input device available".into()))?;
    let name = device.name().unwrap_or_else(|_| "default input".into());

    let ranges = device
        .supported_input_configs()
        .map_err(|e| media_access(&name, e))?;
    let chosen = choose_config(ranges, constraints).ok_or_else(|| {
        IntercomError::MediaAccess(format!("{name}: no usable input configuration"))
    })?;
    let format = chosen.sample_format();
    let config: StreamConfig = chosen.config();

    info!(
        device = %name,
        channels = config.channels,
        sample_rate = config.sample_rate.0,
        ?format,
        "opening microphone"
    );
    if config.channels != constraints.channel_count
        || config.sample_rate.0 != constraints.sample_rate
    {
        debug!("device substitutes its nearest configuration, converting in software");
    }

    let convert = Converter {
        channels: config.channels,
        from: config.sample_rate.0,
        to: constraints.sample_rate,
    };
    let stream = match format {
        SampleFormat::I16 => build::<i16>(&device, &config, convert, chunks),
        SampleFormat::F32 => build::<f32>(&device, &config, convert, chunks),
        SampleFormat::U16 => build::<u16>(&device, &config, convert, chunks),
        other => {
            return Err(IntercomError::MediaAccess(format!(
                "{name}: unsupported sample format {other:?}"
            )))
        }
    }
    .map_err(|e| media_access(&name, e))?;

    stream.play().map_err(|e| media_access(&name, e))?;
    Ok(stream)
}

fn build<T>(
    device: &Device,
    config: &StreamConfig,
    convert: Converter,
    chunks: Sender<Vec<i16>>,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &InputCallbackInfo| {
            let pcm: Vec<i16> = data.iter().map(|&s| i16::from_sample(s)).collect();
            // fails only once the session has let go of the device
            let _ = chunks.send(convert.apply(&pcm));
        },
        |err| warn!("microphone stream error: {err}"),
        None,
    )
}

fn media_access(device: &str, err: impl std::fmt::Display) -> IntercomError {
    IntercomError::MediaAccess(format!("{device}: {err}"))
}

/// Interleaved device samples to mono at the requested rate.
#[derive(Debug, Clone, Copy)]
struct Converter {
    channels: u16,
    from: u32,
    to: u32,
}

impl Converter {
    fn apply(&self, interleaved: &[i16]) -> Vec<i16> {
        resample(&downmix(interleaved, self.channels), self.from, self.to)
    }
}

/// Pick the supported configuration closest to the request: sample rate first,
/// then channel count, then the cheapest sample format to convert.
fn choose_config<I>(ranges: I, constraints: &CaptureConstraints) -> Option<SupportedStreamConfig>
where
    I: IntoIterator<Item = SupportedStreamConfigRange>,
{
    ranges
        .into_iter()
        .filter_map(|range| format_rank(range.sample_format()).map(|rank| (range, rank)))
        .min_by_key(|(range, rank)| {
            let rate = nearest_rate(range, constraints.sample_rate);
            (
                rate.abs_diff(constraints.sample_rate),
                range.channels().abs_diff(constraints.channel_count),
                *rank,
            )
        })
        .map(|(range, _)| {
            let rate = nearest_rate(&range, constraints.sample_rate);
            range.with_sample_rate(SampleRate(rate))
        })
}

fn nearest_rate(range: &SupportedStreamConfigRange, wanted: u32) -> u32 {
    wanted
        .max(range.min_sample_rate().0)
        .min(range.max_sample_rate().0)
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}
