//! In-memory collaborators for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::Instant;

use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};
use crate::resources::{AudioClip, AudioPage, MediaResourceCatalog};
use crate::video::encoder::VideoEncoder;
use crate::video::frame::RgbaFrame;
use crate::webrtc::offer::{media_mid, parse_sdp, MediaKind};
use crate::webrtc::signaling::{CandidateInit, TransportState};
use crate::webrtc::transport::{
    GatheringComplete, MediaSample, MediaSink, PeerTransport, PeerTransportFactory,
};

/// Sink that records every sample with the (tokio) time it was written
pub struct RecordingSink {
    kind: MediaKind,
    samples: Mutex<Vec<(Instant, MediaSample)>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            samples: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn samples(&self) -> Vec<MediaSample> {
        self.samples.lock().iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn timed_samples(&self) -> Vec<(Instant, MediaSample)> {
        self.samples.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSink for RecordingSink {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn write_sample(&self, sample: MediaSample) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Internal("sink rejected sample".to_string()));
        }
        self.samples.lock().push((Instant::now(), sample));
        Ok(())
    }
}

/// What the negotiator did to a [`MockTransport`]
#[derive(Default, Clone)]
pub struct TransportCalls {
    pub order: Vec<&'static str>,
    pub tracks_added: Vec<MediaKind>,
    pub remote_description: Option<String>,
    pub local_description: Option<String>,
    pub remote_candidates: Vec<CandidateInit>,
    pub closes: usize,
}

/// Scriptable transport
pub struct MockTransport {
    candidates: Vec<String>,
    drop_answer_mids: bool,
    fail_answer: bool,
    fail_close: bool,
    finish_gathering: bool,
    close_gate: Option<Arc<Notify>>,
    calls: Mutex<TransportCalls>,
    sinks: Mutex<Vec<Arc<RecordingSink>>>,
    gathering: Mutex<Option<(mpsc::UnboundedSender<String>, oneshot::Sender<()>)>>,
    state_tx: watch::Sender<TransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(TransportState::New);
        Self {
            candidates: Vec::new(),
            drop_answer_mids: false,
            fail_answer: false,
            fail_close: false,
            finish_gathering: true,
            close_gate: None,
            calls: Mutex::new(TransportCalls::default()),
            sinks: Mutex::new(Vec::new()),
            gathering: Mutex::new(None),
            state_tx,
        }
    }

    pub fn with_candidates(mut self, lines: &[&str]) -> Self {
        self.candidates = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn dropping_answer_mids(mut self) -> Self {
        self.drop_answer_mids = true;
        self
    }

    pub fn failing_answer(mut self) -> Self {
        self.fail_answer = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// `close` blocks until `gate` is notified
    pub fn holding_close(mut self, gate: Arc<Notify>) -> Self {
        self.close_gate = Some(gate);
        self
    }

    pub fn never_finishing_gathering(mut self) -> Self {
        self.finish_gathering = false;
        self
    }

    pub fn calls(&self) -> TransportCalls {
        self.calls.lock().clone()
    }

    pub fn sink(&self, kind: MediaKind) -> Option<Arc<RecordingSink>> {
        self.sinks.lock().iter().find(|s| s.kind == kind).cloned()
    }

    pub fn set_state(&self, state: TransportState) {
        self.state_tx.send_replace(state);
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().order.push(call);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn add_local_track(&self, kind: MediaKind) -> Result<Arc<dyn MediaSink>> {
        self.record("add_local_track");
        self.calls.lock().tracks_added.push(kind);
        let sink = Arc::new(RecordingSink::new(kind));
        self.sinks.lock().push(sink.clone());
        Ok(sink)
    }

    fn watch_gathering(&self, tx: mpsc::UnboundedSender<String>) -> GatheringComplete {
        self.record("watch_gathering");
        let (done_tx, done_rx) = oneshot::channel();
        *self.gathering.lock() = Some((tx, done_tx));
        done_rx
    }

    async fn set_remote_description(&self, offer_sdp: &str) -> Result<()> {
        self.record("set_remote_description");
        self.calls.lock().remote_description = Some(offer_sdp.to_string());
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        self.record("create_answer");
        if self.fail_answer {
            return Err(AppError::NegotiationFailed("no codecs in common".to_string()));
        }
        let offer = self.calls.lock().remote_description.clone().unwrap_or_default();
        let offer = parse_sdp(&offer).map_err(AppError::NegotiationFailed)?;

        let mut answer = String::from("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n");
        for media in &offer.media_descriptions {
            answer.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\n",
                media.media_name.media,
                media.media_name.formats.join(" ")
            ));
            if !self.drop_answer_mids {
                if let Some(mid) = media_mid(media) {
                    answer.push_str(&format!("a=mid:{}\r\n", mid));
                }
            }
            answer.push_str("a=sendrecv\r\n");
        }
        Ok(answer)
    }

    async fn set_local_description(&self, answer_sdp: &str) -> Result<()> {
        self.record("set_local_description");
        self.calls.lock().local_description = Some(answer_sdp.to_string());

        if self.finish_gathering {
            if let Some((tx, done)) = self.gathering.lock().take() {
                for line in &self.candidates {
                    let _ = tx.send(line.clone());
                }
                let _ = tx.send(String::new());
                let _ = done.send(());
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.record("add_remote_candidate");
        self.calls.lock().remote_candidates.push(candidate);
        Ok(())
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        self.state_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.calls.lock().closes += 1;
        if let Some(gate) = &self.close_gate {
            gate.notified().await;
        }
        self.set_state(TransportState::Closed);
        if self.fail_close {
            return Err(AppError::Internal("close failed".to_string()));
        }
        Ok(())
    }
}

/// Hands out pre-built transports in order
pub struct MockTransportFactory {
    transports: Mutex<VecDeque<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new(transports: Vec<Arc<MockTransport>>) -> Self {
        Self {
            transports: Mutex::new(transports.into()),
        }
    }
}

#[async_trait]
impl PeerTransportFactory for MockTransportFactory {
    async fn create(&self, _config: &WebRtcConfig, _session_id: &str) -> Result<Arc<dyn PeerTransport>> {
        let transport = self.transports.lock().pop_front().unwrap_or_default();
        Ok(transport)
    }
}

/// One scripted encoder result
#[derive(Debug, Clone, Copy)]
pub enum ScriptStep {
    Packet(&'static [u8]),
    Skip,
    Fail,
}

/// Shared counters of a [`ScriptedEncoder`]
#[derive(Default)]
pub struct EncoderCounters {
    encodes: AtomicUsize,
    closes: AtomicUsize,
}

impl EncoderCounters {
    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Encoder returning scripted results, then a fixed packet forever
pub struct ScriptedEncoder {
    script: VecDeque<ScriptStep>,
    counters: Arc<EncoderCounters>,
}

impl ScriptedEncoder {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: script.into(),
            counters: Arc::new(EncoderCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<EncoderCounters> {
        self.counters.clone()
    }
}

impl VideoEncoder for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    fn encode(&mut self, _frame: &RgbaFrame, _pts: u32) -> Result<Option<Bytes>> {
        self.counters.encodes.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or(ScriptStep::Packet(b"frame")) {
            ScriptStep::Packet(data) => Ok(Some(Bytes::from_static(data))),
            ScriptStep::Skip => Ok(None),
            ScriptStep::Fail => Err(AppError::Encode("scripted failure".to_string())),
        }
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clip of `pages` pages of 20 ms each at 48 kHz
pub fn clip(name: &str, pages: usize) -> AudioClip {
    let pages = (1..=pages)
        .map(|i| AudioPage {
            payload: Bytes::from(vec![i as u8; 8]),
            granule_position: 960 * i as u64,
        })
        .collect();
    AudioClip::new(name, pages)
}

/// Catalog without a font
pub fn catalog(greeting: usize, notice: usize, filler: usize) -> Arc<MediaResourceCatalog> {
    Arc::new(MediaResourceCatalog::from_parts(
        clip("greeting", greeting),
        clip("notice", notice),
        clip("filler", filler),
        None,
    ))
}
