use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use webchat_scheduler::{AutomationSurface, Bridge, StabilizationPolicy, SurfaceError};

#[derive(Clone, Debug)]
pub struct SubmitRecord {
    pub prompt: String,
    pub at: Instant,
    /// Turns the session had finished when this submit arrived.
    pub turns_completed: u64,
}

/// Surface whose reply text follows a script, one frame per sample.
///
/// Once the frames run out it either answers the latest prompt, repeats the
/// last frame, or hangs once (to starve the final re-sample).
#[derive(Default)]
pub struct ScriptedSurface {
    reject_submit: bool,
    reply_to_prompt: bool,
    growing: bool,
    hang_once_when_drained: AtomicBool,
    frames: Mutex<VecDeque<String>>,
    last_frame: Mutex<String>,
    last_prompt: Mutex<String>,
    samples: AtomicUsize,
    submits: Mutex<Vec<SubmitRecord>>,
    bridge: Mutex<Option<Bridge>>,
}

impl ScriptedSurface {
    pub fn steady(text: &str) -> Self {
        Self::with_frames([text])
    }

    pub fn with_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            frames: Mutex::new(frames.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn answering_prompts() -> Self {
        Self {
            reply_to_prompt: true,
            ..Self::default()
        }
    }

    pub fn never_settling() -> Self {
        Self {
            growing: true,
            ..Self::default()
        }
    }

    pub fn without_input() -> Self {
        Self {
            reject_submit: true,
            ..Self::default()
        }
    }

    pub fn hang_once_when_drained(self) -> Self {
        self.hang_once_when_drained.store(true, Ordering::SeqCst);
        self
    }

    pub fn attach(&self, bridge: &Bridge) {
        *self.bridge.lock() = Some(bridge.clone());
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.submits.lock().clone()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationSurface for ScriptedSurface {
    async fn submit(&self, prompt: &str) -> Result<bool, SurfaceError> {
        let turns_completed = self
            .bridge
            .lock()
            .as_ref()
            .map(|bridge| bridge.session_snapshot().turns_completed)
            .unwrap_or_default();
        self.submits.lock().push(SubmitRecord {
            prompt: prompt.to_string(),
            at: Instant::now(),
            turns_completed,
        });
        if self.reject_submit {
            return Ok(false);
        }
        *self.last_prompt.lock() = prompt.to_string();
        Ok(true)
    }

    async fn sample_reply(&self) -> Result<String, SurfaceError> {
        let n = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
        if self.growing {
            return Ok(format!("partial reply {n}"));
        }
        if let Some(frame) = self.frames.lock().pop_front() {
            *self.last_frame.lock() = frame.clone();
            return Ok(frame);
        }
        if self.hang_once_when_drained.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.reply_to_prompt {
            return Ok(format!("reply to {}", self.last_prompt.lock()));
        }
        Ok(self.last_frame.lock().clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn start(surface: &Arc<ScriptedSurface>) -> Bridge {
    start_with(surface, StabilizationPolicy::default())
}

pub fn start_with(surface: &Arc<ScriptedSurface>, policy: StabilizationPolicy) -> Bridge {
    let dyn_surface: Arc<dyn AutomationSurface> = surface.clone();
    let (bridge, _driver) = Bridge::start(dyn_surface, policy);
    surface.attach(&bridge);
    bridge
}
