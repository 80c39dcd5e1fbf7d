use std::num::NonZeroU32;

/// Frame stride gate: lets one frame in every `stride` through to detection.
///
/// The counter starts at 0 and is bumped before the check, so with a stride
/// of 5 the 5th, 10th, 15th, ... frames are processed.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    stride: NonZeroU32,
    counter: u64,
}

impl FrameThrottle {
    pub fn new(stride: NonZeroU32) -> Self {
        Self { stride, counter: 0 }
    }

    pub fn should_process(&mut self) -> bool {
        self.counter = self.counter.wrapping_add(1);
        self.counter % u64::from(self.stride.get()) == 0
    }

    /// Frames seen since startup.
    pub fn frames_seen(&self) -> u64 {
        self.counter
    }

    pub fn stride(&self) -> NonZeroU32 {
        self.stride
    }
}
