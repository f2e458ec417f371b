//! Real-time media pacing
//!
//! Two cooperative loops per session, both gated on connectivity:
//! the audio loop plays the greeting, the notice and then the filler clip on
//! a fixed schedule; the video loop draws, encodes and sends one frame per
//! tick. Neither loop ever restarts once it stops.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

use super::call::CallSession;
use super::lifecycle::CloseReason;
use crate::config::{AudioConfig, VideoConfig};
use crate::error::Result;
use crate::resources::{AudioClip, MediaResourceCatalog};
use crate::video::{FrameDrawer, VideoFramePacket};
use crate::webrtc::transport::MediaSample;

/// Spawns the pacing loops of one session
pub struct MediaPacer {
    session: Arc<CallSession>,
    catalog: Arc<MediaResourceCatalog>,
    drawer: Arc<dyn FrameDrawer>,
    audio: AudioConfig,
    frame_duration: Duration,
}

impl MediaPacer {
    pub fn new(
        session: Arc<CallSession>,
        catalog: Arc<MediaResourceCatalog>,
        drawer: Arc<dyn FrameDrawer>,
        audio: &AudioConfig,
        video: &VideoConfig,
    ) -> Self {
        Self {
            session,
            catalog,
            drawer,
            audio: audio.clone(),
            frame_duration: video.frame_duration(),
        }
    }

    /// Start a loop for every endpoint the session has
    pub async fn start(self) -> Vec<JoinHandle<()>> {
        let (has_audio, has_video) = {
            let media = self.session.media().read().await;
            (media.audio.is_some(), media.video.is_some())
        };

        let mut handles = Vec::new();
        if has_audio {
            let session = self.session.clone();
            let catalog = self.catalog.clone();
            let config = self.audio.clone();
            handles.push(
                self.session
                    .spawn(async move { run_audio(session, catalog, config).await }),
            );
        }
        if has_video {
            let session = self.session.clone();
            let drawer = self.drawer.clone();
            let frame_duration = self.frame_duration;
            handles.push(
                self.session
                    .spawn(async move { run_video(session, drawer, frame_duration).await }),
            );
        }
        handles
    }
}

/// Sleep unless the session is cancelled first; returns whether to continue
async fn pause(session: &CallSession, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => session.is_valid(),
        _ = session.lifecycle().cancel_token().cancelled() => false,
    }
}

async fn pause_until(session: &CallSession, deadline: Instant) -> bool {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = session.lifecycle().cancel_token().cancelled() => false,
    }
}

async fn send_audio(session: &CallSession, sample: MediaSample) -> Option<Result<()>> {
    let media = session.media().read().await;
    let sink = media.audio.as_ref()?;
    Some(sink.write_sample(sample).await)
}

/// Play every page of `clip`; false when the session stopped
async fn play_clip(session: &CallSession, clip: &AudioClip, sample_rate: u32) -> bool {
    info!("Playing {} ({} pages)", clip.name, clip.len());

    let durations = clip.page_durations(sample_rate);
    let mut next_send = Instant::now();

    for (page, duration) in clip.pages.iter().zip(durations) {
        if !session.is_valid() {
            return false;
        }

        let sample = MediaSample {
            data: page.payload.clone(),
            duration,
            packet_timestamp: 0,
        };
        match send_audio(session, sample).await {
            Some(Ok(())) => trace!("Audio page sent, granule {}", page.granule_position),
            Some(Err(e)) => {
                error!("Audio send failed: {}", e);
                session.close(CloseReason::Fault).await;
                return false;
            }
            None => return false,
        }

        // Accumulated deadline keeps scheduling jitter from adding up
        next_send += duration;
        if !pause_until(session, next_send).await {
            return false;
        }
    }
    true
}

pub async fn run_audio(
    session: Arc<CallSession>,
    catalog: Arc<MediaResourceCatalog>,
    config: AudioConfig,
) {
    if !session.wait_connected().await {
        debug!("Audio loop: session ended before connecting");
        return;
    }
    info!("Audio loop started");

    let rate = config.sample_rate;
    let start_delay = Duration::from_millis(config.start_delay_ms);
    let notice_delay = Duration::from_millis(config.notice_delay_ms);
    let filler_interval = Duration::from_millis(config.filler_interval_ms);

    if pause(&session, start_delay).await
        && play_clip(&session, &catalog.greeting, rate).await
        && pause(&session, notice_delay).await
        && play_clip(&session, &catalog.notice, rate).await
    {
        while pause(&session, filler_interval).await
            && play_clip(&session, &catalog.filler, rate).await
        {}
    }

    info!("Audio loop stopped");
}

enum Tick {
    Encoded(Option<VideoFramePacket>),
    Stop,
}

pub async fn run_video(
    session: Arc<CallSession>,
    drawer: Arc<dyn FrameDrawer>,
    frame_duration: Duration,
) {
    if !session.wait_connected().await {
        debug!("Video loop: session ended before connecting");
        return;
    }
    info!("Video loop started, {:?} per frame", frame_duration);

    let mut ticker = tokio::time::interval(frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut index: u32 = 0;
    let mut frames_sent: u64 = 0;

    loop {
        if !session.is_valid() {
            break;
        }

        let tick = {
            let media = session.media().read().await;
            match media.video.as_ref() {
                None => Tick::Stop,
                Some(video) => {
                    let mut pipeline = video.pipeline.lock();
                    let drawn = pipeline.frame_mut().map(|frame| drawer.draw(frame, index));
                    match drawn.and_then(|_| pipeline.encode(index)) {
                        Ok(packet) => Tick::Encoded(packet),
                        Err(e) => {
                            error!("Encoding frame {} failed: {}", index, e);
                            Tick::Stop
                        }
                    }
                }
            }
        };

        let packet = match tick {
            Tick::Encoded(packet) => packet,
            Tick::Stop => {
                session.close(CloseReason::Fault).await;
                break;
            }
        };

        // Guard is released while waiting for the tick
        tokio::select! {
            _ = ticker.tick() => {}
            _ = session.lifecycle().cancel_token().cancelled() => break,
        }

        if let Some(packet) = packet {
            let result = {
                let media = session.media().read().await;
                if !session.is_valid() {
                    break;
                }
                let Some(video) = media.video.as_ref() else {
                    break;
                };
                video
                    .sink
                    .write_sample(MediaSample {
                        data: packet.data,
                        duration: packet.duration,
                        packet_timestamp: packet.presentation_index,
                    })
                    .await
            };
            if let Err(e) = result {
                error!("Video send failed: {}", e);
                session.close(CloseReason::Fault).await;
                break;
            }
            frames_sent += 1;
        } else {
            trace!("Frame {} skipped by encoder", index);
        }

        index = index.wrapping_add(1);
    }

    info!("Video loop stopped after {} frames", frames_sent);
}
