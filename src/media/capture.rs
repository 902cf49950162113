use crate::config::CaptureConstraints;
use crate::error::{IntercomError, Result};
use crate::media::pcm::load_wav;
use crate::media::{g711, pcmu_track, CaptureGuard, LocalTrack, MediaAcquirer};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Something that produces microphone-like PCM.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Open the device with the requested settings. The device may substitute
    /// the nearest values it supports.
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn PcmSource>>;
}

/// Open capture stream. Dropping it closes the device.
pub trait PcmSource: Send {
    /// Next frame of `len` mono samples, `None` once the stream has ended.
    fn next_frame(&mut self, len: usize) -> Option<Vec<i16>>;
}

/// [`MediaAcquirer`] over any [`CaptureDevice`]: frames are mu-law encoded and
/// pushed into a PCMU track at the packetisation interval.
pub struct DeviceAcquirer {
    device: Arc<dyn CaptureDevice>,
}

impl DeviceAcquirer {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl MediaAcquirer for DeviceAcquirer {
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<LocalTrack> {
        let source = self.device.open(constraints).await?;
        let track = pcmu_track(format!("intercom-{}", random_id()));
        info!(
            stream = %track.stream_id(),
            sample_rate = constraints.sample_rate,
            channels = constraints.channel_count,
            "capture acquired"
        );

        let source = Arc::new(Mutex::new(Some(source)));
        let pump = tokio::spawn(pump_frames(source.clone(), track.clone(), *constraints));
        Ok(LocalTrack::new(
            track,
            Box::new(PumpGuard {
                source,
                pump: Some(pump),
            }),
        ))
    }
}

type SharedSource = Arc<Mutex<Option<Box<dyn PcmSource>>>>;

struct PumpGuard {
    source: SharedSource,
    pump: Option<JoinHandle<()>>,
}

impl CaptureGuard for PumpGuard {
    fn release(&mut self) {
        // dropping the source closes the device right here, not on the pump's next poll
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(source);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump_frames(
    source: SharedSource,
    track: Arc<TrackLocalStaticSample>,
    constraints: CaptureConstraints,
) {
    let frame_len = constraints.frame_len();
    let mut ticker = interval(constraints.ptime());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let frame = {
            let mut slot = source.lock().unwrap_or_else(PoisonError::into_inner);
            slot.as_mut().and_then(|s| s.next_frame(frame_len))
        };
        let Some(frame) = frame else {
            debug!("capture stream ended");
            break;
        };
        let sample = Sample {
            data: Bytes::from(g711::encode(&frame)),
            duration: constraints.ptime(),
            ..Default::default()
        };
        // not bound until negotiation finishes, writes before that are dropped
        if let Err(e) = track.write_sample(&sample).await {
            trace!("dropping capture frame: {e}");
        }
    }
}

/// Source fed with mono chunks from a capture thread.
///
/// Chunks of any size are re-framed to the packet length. An underrun yields a
/// silent frame, and the backlog is capped so latency cannot build up. Dropping
/// the source drops `stop`, which tells the thread to close its stream.
pub struct ChannelSource {
    chunks: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    max_backlog: usize,
    ended: bool,
    _stop: Sender<()>,
}

impl ChannelSource {
    pub fn new(chunks: Receiver<Vec<i16>>, stop: Sender<()>, max_backlog: usize) -> Self {
        Self {
            chunks,
            pending: VecDeque::new(),
            max_backlog,
            ended: false,
            _stop: stop,
        }
    }
}

impl PcmSource for ChannelSource {
    fn next_frame(&mut self, len: usize) -> Option<Vec<i16>> {
        while !self.ended {
            match self.chunks.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.ended = true,
            }
        }

        let excess = self.pending.len().saturating_sub(self.max_backlog.max(len));
        if excess > 0 {
            trace!(dropped = excess, "capture backlog trimmed");
            self.pending.drain(..excess);
        }

        if self.pending.len() >= len {
            return Some(self.pending.drain(..len).collect());
        }
        if !self.ended {
            return Some(vec![0; len]);
        }
        if self.pending.is_empty() {
            return None;
        }
        let mut tail: Vec<i16> = self.pending.drain(..).collect();
        tail.resize(len, 0);
        Some(tail)
    }
}

/// A WAV file standing in for the microphone.
pub struct WavFileDevice {
    path: PathBuf,
    looped: bool,
}

impl WavFileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            looped: false,
        }
    }

    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }
}

#[async_trait]
impl CaptureDevice for WavFileDevice {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn PcmSource>> {
        let path = self.path.clone();
        let rate = constraints.sample_rate;
        let pcm = tokio::task::spawn_blocking(move || load_wav(&path, rate))
            .await
            .map_err(|e| IntercomError::MediaAccess(e.to_string()))?
            .map_err(|e| {
                IntercomError::MediaAccess(format!("{}: {e}", self.path.display()))
            })?;

        if pcm.samples.is_empty() {
            return Err(IntercomError::MediaAccess(format!(
                "{} contains no audio",
                self.path.display()
            )));
        }
        Ok(Box::new(BufferedSource {
            samples: pcm.samples,
            pos: 0,
            looped: self.looped,
        }))
    }
}

struct BufferedSource {
    samples: Vec<i16>,
    pos: usize,
    looped: bool,
}

impl PcmSource for BufferedSource {
    fn next_frame(&mut self, len: usize) -> Option<Vec<i16>> {
        if self.pos >= self.samples.len() {
            if !self.looped {
                return None;
            }
            self.pos = 0;
        }
        let end = (self.pos + len).min(self.samples.len());
        let mut frame = self.samples[self.pos..end].to_vec();
        self.pos = end;
        frame.resize(len, 0);
        Some(frame)
    }
}

/// Listen-only: an endless stream of silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceDevice;

#[async_trait]
impl CaptureDevice for SilenceDevice {
    async fn open(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn PcmSource>> {
        Ok(Box::new(Silence))
    }
}

struct Silence;

impl PcmSource for Silence {
    fn next_frame(&mut self, len: usize) -> Option<Vec<i16>> {
        Some(vec![0; len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn buffered_source_pads_last_frame() {
        let mut src = BufferedSource {
            samples: vec![1; 250],
            pos: 0,
            looped: false,
        };
        assert_eq!(src.next_frame(160).map(|f| f.len()), Some(160));
        let tail = src.next_frame(160).unwrap();
        assert_eq!(tail.len(), 160);
        assert_eq!(tail[89], 1);
        assert_eq!(tail[90], 0);
        assert!(src.next_frame(160).is_none());
    }

    #[test]
    fn looped_source_restarts() {
        let mut src = BufferedSource {
            samples: vec![7; 160],
            pos: 0,
            looped: true,
        };
        for _ in 0..3 {
            assert_eq!(src.next_frame(160), Some(vec![7; 160]));
        }
    }

    #[tokio::test]
    async fn missing_file_is_a_media_access_error() {
        let device = WavFileDevice::new("/definitely/not/here.wav");
        let res = device.open(&CaptureConstraints::intercom()).await;
        assert!(matches!(res, Err(IntercomError::MediaAccess(_))));
    }

    #[tokio::test]
    async fn acquire_from_wav_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mic.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(&path, spec).unwrap();
        for i in 0..800 {
            w.write_sample((i % 100) as i16).unwrap();
        }
        w.finalize().unwrap();

        let acquirer = DeviceAcquirer::new(Arc::new(WavFileDevice::new(&path)));
        let track = acquirer.acquire(&CaptureConstraints::intercom()).await.unwrap();
        assert!(!track.is_released());
        assert!(track.rtp_track().stream_id().starts_with("intercom-"));
        track.release();
    }

    struct Watched(Arc<AtomicBool>);

    impl PcmSource for Watched {
        fn next_frame(&mut self, len: usize) -> Option<Vec<i16>> {
            Some(vec![0; len])
        }
    }

    impl Drop for Watched {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct WatchedDevice(Arc<AtomicBool>);

    #[async_trait]
    impl CaptureDevice for WatchedDevice {
        async fn open(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn PcmSource>> {
            Ok(Box::new(Watched(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn release_closes_the_device_immediately() {
        let closed = Arc::new(AtomicBool::new(false));
        let acquirer = DeviceAcquirer::new(Arc::new(WatchedDevice(closed.clone())));
        let track = acquirer.acquire(&CaptureConstraints::intercom()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closed.load(Ordering::SeqCst));

        track.release();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn channel_source_reframes_chunks() {
        let (tx, rx) = mpsc::channel();
        let (stop, _stopped) = mpsc::channel();
        let mut src = ChannelSource::new(rx, stop, 1600);

        tx.send(vec![1; 100]).unwrap();
        tx.send(vec![2; 100]).unwrap();
        let frame = src.next_frame(160).unwrap();
        assert_eq!(&frame[..100], &[1; 100][..]);
        assert_eq!(&frame[100..], &[2; 60][..]);

        // 40 samples pending, not enough for a frame
        assert_eq!(src.next_frame(160), Some(vec![0; 160]));
        tx.send(vec![3; 120]).unwrap();
        let frame = src.next_frame(160).unwrap();
        assert_eq!(frame[0], 2);
        assert_eq!(frame[159], 3);
    }

    #[test]
    fn channel_source_trims_backlog() {
        let (tx, rx) = mpsc::channel();
        let (stop, _stopped) = mpsc::channel();
        let mut src = ChannelSource::new(rx, stop, 320);

        tx.send(vec![1; 1000]).unwrap();
        tx.send(vec![2; 320]).unwrap();
        assert_eq!(src.next_frame(160), Some(vec![2; 160]));
        assert_eq!(src.next_frame(160), Some(vec![2; 160]));
    }

    #[test]
    fn channel_source_ends_with_the_thread() {
        let (tx, rx) = mpsc::channel();
        let (stop, stopped) = mpsc::channel::<()>();
        let mut src = ChannelSource::new(rx, stop, 1600);

        tx.send(vec![5; 10]).unwrap();
        drop(tx);
        let tail = src.next_frame(160).unwrap();
        assert_eq!(&tail[..10], &[5; 10][..]);
        assert_eq!(tail[10], 0);
        assert!(src.next_frame(160).is_none());

        drop(src);
        assert!(stopped.recv().is_err());
    }

    #[tokio::test]
    async fn silence_never_ends() {
        let mut src = SilenceDevice.open(&CaptureConstraints::intercom()).await.unwrap();
        assert_eq!(src.next_frame(4), Some(vec![0; 4]));
    }
}
