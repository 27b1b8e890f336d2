use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Bounded queue of stereo i16 frames between the emulation thread and an
/// audio callback.
///
/// Lossy when full: new pushes are dropped so the producer never blocks.
#[derive(Clone)]
pub struct AudioProducer {
    tx: Sender<[i16; 2]>,
}

#[derive(Clone)]
pub struct AudioConsumer {
    rx: Receiver<[i16; 2]>,
}

pub fn audio_queue(capacity_frames: usize) -> (AudioProducer, AudioConsumer) {
    let (tx, rx) = bounded(capacity_frames.max(1));
    (AudioProducer { tx }, AudioConsumer { rx })
}

impl AudioProducer {
    /// Returns false if the frame was dropped.
    #[inline]
    pub fn push_stereo(&self, left: i16, right: i16) -> bool {
        match self.tx.try_send([left, right]) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

impl AudioConsumer {
    #[inline]
    pub fn pop_stereo(&self) -> Option<(i16, i16)> {
        self.rx.try_recv().ok().map(|[l, r]| (l, r))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.rx.capacity().unwrap_or(0)
    }
}
