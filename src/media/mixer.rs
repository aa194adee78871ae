use std::collections::VecDeque;

/// Sums several mono PCM sources into one, a frame at a time.
///
/// Each source queues decoded samples independently; a source that has
/// nothing buffered contributes silence. Output is clamped to `[-1.0, 1.0]`.
#[derive(Debug)]
pub struct AudioMixer {
    frame_size: usize,
    sources: Vec<VecDeque<f32>>,
    /// Upper bound per source; older samples are dropped past it.
    max_backlog: usize,
}

impl AudioMixer {
    pub fn new(sources: usize, frame_size: usize) -> Self {
        Self {
            frame_size,
            sources: vec![VecDeque::new(); sources],
            max_backlog: frame_size * 50,
        }
    }

    pub fn push(&mut self, source: usize, samples: &[f32]) {
        let Some(queue) = self.sources.get_mut(source) else {
            return;
        };
        queue.extend(samples.iter().copied());
        let excess = queue.len().saturating_sub(self.max_backlog);
        if excess > 0 {
            queue.drain(..excess);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.iter().all(|q| q.is_empty())
    }

    /// Take one mixed frame from whatever each source has buffered. Always
    /// a full frame; all silence when nothing is queued.
    pub fn mix_frame(&mut self) -> Vec<f32> {
        let mut mixed = vec![0.0f32; self.frame_size];
        for queue in &mut self.sources {
            let take = queue.len().min(self.frame_size);
            for (out, sample) in mixed.iter_mut().zip(queue.drain(..take)) {
                *out += sample;
            }
        }
        for sample in &mut mixed {
            *sample = sample.clamp(-1.0, 1.0);
        }
        mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_sources_and_pads_with_silence() {
        let mut mixer = AudioMixer::new(2, 4);
        mixer.push(0, &[0.1, 0.2, 0.3, 0.4]);
        mixer.push(1, &[0.5, 0.5]);
        let frame = mixer.mix_frame();
        let expected = [0.6, 0.7, 0.3, 0.4];
        for (a, b) in frame.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(mixer.is_empty());
        assert_eq!(mixer.mix_frame(), vec![0.0; 4]);
    }

    #[test]
    fn one_frame_per_call_even_with_backlog() {
        let mut mixer = AudioMixer::new(2, 2);
        mixer.push(0, &[0.1, 0.1, 0.2, 0.2]);
        assert_eq!(mixer.mix_frame(), vec![0.1, 0.1]);
        mixer.push(1, &[0.3, 0.3]);
        let frame = mixer.mix_frame();
        assert!((frame[0] - 0.5).abs() < 1e-6);
        assert!(mixer.is_empty());
    }

    #[test]
    fn clamps_overflow() {
        let mut mixer = AudioMixer::new(2, 2);
        mixer.push(0, &[0.9, -0.9]);
        mixer.push(1, &[0.9, -0.9]);
        assert_eq!(mixer.mix_frame(), vec![1.0, -1.0]);
    }

    #[test]
    fn backlog_is_bounded() {
        let mut mixer = AudioMixer::new(1, 2);
        mixer.push(0, &vec![0.0; 1000]);
        assert_eq!(mixer.sources[0].len(), 100);
        assert!(!mixer.is_empty());
    }

    #[test]
    fn unknown_source_is_ignored() {
        let mut mixer = AudioMixer::new(1, 2);
        mixer.push(3, &[1.0]);
        assert!(mixer.is_empty());
    }
}
