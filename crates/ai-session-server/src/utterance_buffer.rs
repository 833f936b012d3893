//! Per-session utterance buffer (spec.md §4.4 step 1): a VAD independent
//! of C1's negotiation-time VAD, operating on the negotiated config, that
//! accumulates inbound audio into discrete utterances.

use std::collections::VecDeque;

use voice_asp_protocol::config::VadConfig;

#[derive(Debug, Clone)]
pub struct CompletedUtterance {
    pub pcm: Vec<u8>,
    pub duration_ms: u64,
}

/// What happened as a result of one [`UtteranceBuffer::push_frame`] call.
#[derive(Debug)]
pub enum FrameEvent {
    /// Nothing notable: either still awaiting onset, or mid-utterance.
    None,
    /// Onset just crossed `speech_ratio`; the caller should emit
    /// `audio.speech_start` (spec.md §4.1 lifecycle messages).
    SpeechStarted,
    /// Trailing silence (or `max_buffer_seconds`) closed the utterance.
    Completed(CompletedUtterance),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    AwaitingSpeech,
    InSpeech,
}

/// Energy-based frame classifier: RMS amplitude of 16-bit PCM normalized
/// to `[0.0, 1.0]`, compared against the negotiated `threshold`.
pub(crate) fn is_speech_frame(pcm: &[u8], threshold: f32) -> bool {
    if pcm.len() < 2 {
        return false;
    }
    let samples: Vec<i16> = pcm.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
    if samples.is_empty() {
        return false;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    let normalized = (rms / i16::MAX as f64) as f32;
    normalized >= threshold
}

/// Accumulates frames into an utterance using a sliding onset/offset
/// window (`ring_buffer_frames`/`speech_ratio`) plus prefix padding so the
/// very first bit of speech, which preceded confirmed onset, is not lost.
pub struct UtteranceBuffer {
    frame_duration_ms: u64,
    vad: VadConfig,
    max_buffer_ms: u64,
    state: BufferState,
    window: VecDeque<bool>,
    prefix: VecDeque<Vec<u8>>,
    accumulated: Vec<u8>,
    speech_ms: u64,
    silence_ms: u64,
}

impl UtteranceBuffer {
    pub fn new(vad: VadConfig, frame_duration_ms: u64, max_buffer_seconds: u64) -> Self {
        Self {
            frame_duration_ms,
            max_buffer_ms: max_buffer_seconds * 1000,
            window: VecDeque::with_capacity(vad.ring_buffer_frames as usize),
            prefix: VecDeque::new(),
            accumulated: Vec::new(),
            speech_ms: 0,
            silence_ms: 0,
            state: BufferState::AwaitingSpeech,
            vad,
        }
    }

    fn prefix_capacity_frames(&self) -> usize {
        ((self.vad.prefix_padding_ms as u64 + self.frame_duration_ms - 1) / self.frame_duration_ms.max(1)) as usize
    }

    /// Push one inbound frame. Returns [`FrameEvent::Completed`] when
    /// silence has accumulated past `silence_threshold_ms` with at least
    /// `min_speech_ms` of speech already collected (or `max_buffer_seconds`
    /// forces an early flush), [`FrameEvent::SpeechStarted`] on the onset
    /// edge, or `FrameEvent::None` otherwise.
    pub fn push_frame(&mut self, pcm: &[u8]) -> FrameEvent {
        if !self.vad.enabled {
            self.accumulated.extend_from_slice(pcm);
            self.speech_ms += self.frame_duration_ms;
            if self.speech_ms >= self.max_buffer_ms {
                return FrameEvent::Completed(self.flush());
            }
            return FrameEvent::None;
        }

        let speech = is_speech_frame(pcm, self.vad.threshold);
        self.window.push_back(speech);
        if self.window.len() > self.vad.ring_buffer_frames as usize {
            self.window.pop_front();
        }
        let speech_fraction = self.window.iter().filter(|&&s| s).count() as f32 / self.window.len().max(1) as f32;

        match self.state {
            BufferState::AwaitingSpeech => {
                self.prefix.push_back(pcm.to_vec());
                while self.prefix.len() > self.prefix_capacity_frames().max(1) {
                    self.prefix.pop_front();
                }
                if speech_fraction >= self.vad.speech_ratio {
                    self.state = BufferState::InSpeech;
                    for frame in self.prefix.drain(..) {
                        self.accumulated.extend_from_slice(&frame);
                        self.speech_ms += self.frame_duration_ms;
                    }
                    self.silence_ms = 0;
                    return FrameEvent::SpeechStarted;
                }
                FrameEvent::None
            }
            BufferState::InSpeech => {
                self.accumulated.extend_from_slice(pcm);
                if speech {
                    self.speech_ms += self.frame_duration_ms;
                    self.silence_ms = 0;
                } else {
                    self.silence_ms += self.frame_duration_ms;
                }

                let total_ms = self.speech_ms + self.silence_ms;
                if total_ms >= self.max_buffer_ms {
                    return FrameEvent::Completed(self.flush());
                }
                if self.silence_ms as u32 >= self.vad.silence_threshold_ms && self.speech_ms as u32 >= self.vad.min_speech_ms {
                    return FrameEvent::Completed(self.flush());
                }
                FrameEvent::None
            }
        }
    }

    fn flush(&mut self) -> CompletedUtterance {
        let pcm = std::mem::take(&mut self.accumulated);
        let duration_ms = self.speech_ms + self.silence_ms;
        self.speech_ms = 0;
        self.silence_ms = 0;
        self.state = BufferState::AwaitingSpeech;
        self.window.clear();
        self.prefix.clear();
        CompletedUtterance { pcm, duration_ms }
    }
}

/// Monitor-mode VAD (spec.md §4.3 "Barge-in"): runs the same onset
/// detector as [`UtteranceBuffer`] while `is_playing_response`, but never
/// accumulates audio — its only output is a rising-edge onset signal.
pub struct MonitorVad {
    window: VecDeque<bool>,
    ring_buffer_frames: usize,
    speech_ratio: f32,
    threshold: f32,
    active: bool,
}

impl MonitorVad {
    pub fn new(vad: &VadConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(vad.ring_buffer_frames as usize),
            ring_buffer_frames: vad.ring_buffer_frames as usize,
            speech_ratio: vad.speech_ratio,
            threshold: vad.threshold,
            active: false,
        }
    }

    /// Feed one frame. Returns `true` exactly on the frame where sustained
    /// speech first crosses `speech_ratio` (the onset edge); the frame
    /// itself is not retained anywhere, per monitor mode.
    pub fn push(&mut self, pcm: &[u8]) -> bool {
        let speech = is_speech_frame(pcm, self.threshold);
        self.window.push_back(speech);
        if self.window.len() > self.ring_buffer_frames.max(1) {
            self.window.pop_front();
        }
        let speech_fraction = self.window.iter().filter(|&&s| s).count() as f32 / self.window.len().max(1) as f32;
        let now_active = speech_fraction >= self.speech_ratio;
        let onset = now_active && !self.active;
        self.active = now_active;
        onset
    }

    /// Clear accumulated state, e.g. when re-entering `listening`.
    pub fn reset(&mut self) {
        self.window.clear();
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_frame(len_bytes: usize) -> Vec<u8> {
        let sample = 20000i16.to_le_bytes();
        sample.iter().cycle().take(len_bytes).copied().collect()
    }

    fn silent_frame(len_bytes: usize) -> Vec<u8> {
        vec![0u8; len_bytes]
    }

    #[test]
    fn completes_an_utterance_after_trailing_silence() {
        let vad = VadConfig { ring_buffer_frames: 2, speech_ratio: 0.5, min_speech_ms: 40, silence_threshold_ms: 100, ..Default::default() };
        let mut buf = UtteranceBuffer::new(vad, 20, 60);

        let mut started = false;
        for _ in 0..4 {
            match buf.push_frame(&loud_frame(320)) {
                FrameEvent::SpeechStarted => started = true,
                FrameEvent::None => {}
                FrameEvent::Completed(_) => panic!("should not complete while still speaking"),
            }
        }
        assert!(started, "onset should have fired within the first four loud frames");

        let mut completed = None;
        for _ in 0..6 {
            if let FrameEvent::Completed(u) = buf.push_frame(&silent_frame(320)) {
                completed = Some(u);
                break;
            }
        }
        let utterance = completed.expect("utterance should have completed");
        assert!(utterance.duration_ms > 0);
        assert!(!utterance.pcm.is_empty());
    }

    #[test]
    fn max_buffer_seconds_forces_a_flush() {
        let vad = VadConfig { ring_buffer_frames: 2, speech_ratio: 0.5, min_speech_ms: 1000000, silence_threshold_ms: 1000000, ..Default::default() };
        let mut buf = UtteranceBuffer::new(vad, 20, 1);
        let mut completed = None;
        for _ in 0..80 {
            if let FrameEvent::Completed(u) = buf.push_frame(&loud_frame(320)) {
                completed = Some(u);
                break;
            }
        }
        assert!(completed.is_some(), "1s of max_buffer_seconds at 20ms frames should force a flush well before 80 frames");
    }

    #[test]
    fn disabled_vad_just_accumulates_until_max_buffer() {
        let vad = VadConfig { enabled: false, ..Default::default() };
        let mut buf = UtteranceBuffer::new(vad, 20, 1);
        let mut completed = None;
        for _ in 0..60 {
            if let FrameEvent::Completed(u) = buf.push_frame(&silent_frame(320)) {
                completed = Some(u);
                break;
            }
        }
        assert!(completed.is_some());
    }

    #[test]
    fn monitor_vad_fires_once_on_onset_then_stays_quiet() {
        let vad = VadConfig { ring_buffer_frames: 2, speech_ratio: 0.5, ..Default::default() };
        let mut monitor = MonitorVad::new(&vad);
        assert!(!monitor.push(&silent_frame(320)));
        assert!(monitor.push(&loud_frame(320)), "onset edge should fire once speech_ratio is crossed");
        for _ in 0..5 {
            assert!(!monitor.push(&loud_frame(320)), "must not re-fire while still in speech");
        }
    }

    #[test]
    fn monitor_vad_rearms_after_silence() {
        let vad = VadConfig { ring_buffer_frames: 2, speech_ratio: 0.5, ..Default::default() };
        let mut monitor = MonitorVad::new(&vad);
        assert!(monitor.push(&loud_frame(320)));
        assert!(!monitor.push(&silent_frame(320)));
        assert!(!monitor.push(&silent_frame(320)));
        assert!(monitor.push(&loud_frame(320)), "a fresh onset after silence should fire again");
    }
}
