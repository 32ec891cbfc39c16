//! Controller façade over the control units
//!
//! A [`Controller`] owns the units for one device and a single action queue.
//! Every device operation runs on the queue's worker, so unit calls are
//! never concurrent. Callers either post actions and track them by id, or
//! use the blocking helpers which post and wait in one step.

mod action;
mod arena;

use futures::FutureExt;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::action_queue::{ActionId, ActionQueue, ActionStatus};
use crate::error::{ControlError, Result};
use crate::frame::CapturedFrame;
use crate::unit::{ControlUnits, Resolution, SwipeStep};

pub use action::{Action, ActionRecord, ControllerEvent, Rect};
pub use arena::{ControllerArena, ControllerHandle};

/// Interval between sampled points of a generated swipe, in milliseconds
const SWIPE_SAMPLE_MS: u64 = 2;

/// Size frames are scaled to before they reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSize {
    Width(u32),
    Height(u32),
}

impl TargetSize {
    /// A zero edge would make every frame empty and every point unmappable
    pub fn is_valid(self) -> bool {
        match self {
            TargetSize::Width(v) | TargetSize::Height(v) => v > 0,
        }
    }

    /// Scaled dimensions for a `width` x `height` source, keeping aspect ratio
    pub fn apply(self, width: u32, height: u32) -> (u32, u32) {
        let scale = |value: u32, from: u32, to: u32| -> u32 {
            ((f64::from(value) * f64::from(to) / f64::from(from.max(1))).round() as u32).max(1)
        };
        match self {
            TargetSize::Width(w) => (w, scale(height, width, w)),
            TargetSize::Height(h) => (scale(width, height, h), h),
        }
    }
}

#[derive(Default)]
pub struct ControllerOptions {
    /// Resize captured frames; touch coordinates are then given in that space
    pub target_size: Option<TargetSize>,
    pub events: Option<mpsc::UnboundedSender<ControllerEvent>>,
}

impl ControllerOptions {
    pub fn with_target_size(mut self, target: TargetSize) -> Result<Self> {
        if !target.is_valid() {
            return Err(ControlError::InvalidArgument(format!(
                "target size must be positive, got {:?}",
                target
            )));
        }
        self.target_size = Some(target);
        Ok(self)
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

struct ControllerState {
    units: tokio::sync::Mutex<ControlUnits>,
    connected: AtomicBool,
    image_cache: Mutex<Option<CapturedFrame>>,
    uuid: Mutex<Option<String>>,
    resolution: Mutex<Option<Resolution>>,
    target_size: Option<TargetSize>,
    tracked: Mutex<HashSet<ActionId>>,
    events: Option<mpsc::UnboundedSender<ControllerEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ControllerState {
    fn emit(&self, event: ControllerEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                warn!("controller event receiver dropped");
            }
        }
    }

    fn uuid(&self) -> Option<String> {
        lock(&self.uuid).clone()
    }

    async fn run(&self, record: ActionRecord) -> bool {
        let tracked = lock(&self.tracked).contains(&record.id);
        if tracked {
            self.emit(ControllerEvent::ActionStarted {
                id: record.id,
                uuid: self.uuid(),
            });
        }
        info!("action start: {}", record);
        let name = record.action.name();

        let ok = match record.action {
            Action::Connect => self.connect().await,
            Action::Click { x, y } => self.click(x, y).await,
            Action::Swipe { steps } => self.swipe(steps).await,
            Action::PressKey { key } => self.units.lock().await.touch_input.press_key(key).await,
            Action::Screencap => self.screencap().await,
            Action::StartApp { intent } => self.units.lock().await.activity.start(&intent).await,
            Action::StopApp { intent } => self.units.lock().await.activity.stop(&intent).await,
        };
        info!("action done: #{} {}, ok: {}", record.id, name, ok);

        if tracked {
            lock(&self.tracked).remove(&record.id);
            let uuid = self.uuid();
            self.emit(if ok {
                ControllerEvent::ActionCompleted {
                    id: record.id,
                    uuid,
                }
            } else {
                ControllerEvent::ActionFailed {
                    id: record.id,
                    uuid,
                }
            });
        }
        ok
    }

    async fn connect(&self) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        let mut units = self.units.lock().await;

        let fail = |why: &str| {
            error!("connect failed: {}", why);
            self.emit(ControllerEvent::ConnectFailed {
                why: why.to_string(),
            });
            false
        };

        if !units.connection.connect().await {
            return fail("connect failed");
        }

        let Some(uuid) = units.device_info.request_uuid().await else {
            return fail("request uuid failed");
        };
        *lock(&self.uuid) = Some(uuid.clone());
        self.emit(ControllerEvent::UuidGot { uuid });

        let Some(resolution) = units.device_info.request_resolution().await else {
            return fail("request resolution failed");
        };
        *lock(&self.resolution) = Some(resolution);
        self.emit(ControllerEvent::ResolutionGot {
            width: resolution.width,
            height: resolution.height,
        });

        if !units.screencap.init(resolution.width, resolution.height).await {
            return fail("screencap init failed");
        }
        self.emit(ControllerEvent::ScreencapInited);

        if !units
            .touch_input
            .init(resolution.width, resolution.height)
            .await
        {
            return fail("touch input init failed");
        }
        self.emit(ControllerEvent::TouchInputInited);

        self.connected.store(true, Ordering::SeqCst);
        self.emit(ControllerEvent::ConnectSuccess);
        true
    }

    /// Map a point from caller space to device space
    fn to_device(&self, x: i32, y: i32) -> (i32, i32) {
        let (Some(target), Some(resolution)) = (self.target_size, *lock(&self.resolution)) else {
            return (x, y);
        };
        let (Ok(width), Ok(height)) = (
            u32::try_from(resolution.width),
            u32::try_from(resolution.height),
        ) else {
            return (x, y);
        };

        let (tw, th) = target.apply(width, height);
        (
            (f64::from(x) * f64::from(width) / f64::from(tw)).round() as i32,
            (f64::from(y) * f64::from(height) / f64::from(th)).round() as i32,
        )
    }

    async fn click(&self, x: i32, y: i32) -> bool {
        let (x, y) = self.to_device(x, y);
        self.units.lock().await.touch_input.click(x, y).await
    }

    async fn swipe(&self, steps: Vec<SwipeStep>) -> bool {
        let steps: Vec<SwipeStep> = steps
            .into_iter()
            .map(|step| {
                let (x, y) = self.to_device(step.x, step.y);
                SwipeStep { x, y, ..step }
            })
            .collect();
        self.units.lock().await.touch_input.swipe(&steps).await
    }

    async fn screencap(&self) -> bool {
        let Some(frame) = self.units.lock().await.screencap.screencap().await else {
            return false;
        };

        let frame = match self.target_size {
            Some(target) => {
                let (width, height) = target.apply(frame.width(), frame.height());
                frame.resized(width, height)
            }
            None => frame,
        };

        *lock(&self.image_cache) = Some(frame);
        true
    }
}

/// Drives one device through an ordered action queue
pub struct Controller {
    state: Arc<ControllerState>,
    queue: ActionQueue<Action>,
}

impl Controller {
    /// Create a controller; must be called inside a tokio runtime
    pub fn new(units: ControlUnits, options: ControllerOptions) -> Self {
        let state = Arc::new(ControllerState {
            units: tokio::sync::Mutex::new(units),
            connected: AtomicBool::new(false),
            image_cache: Mutex::new(None),
            uuid: Mutex::new(None),
            resolution: Mutex::new(None),
            target_size: options.target_size.filter(|target| {
                if !target.is_valid() {
                    warn!("ignoring invalid target size {:?}", target);
                }
                target.is_valid()
            }),
            tracked: Mutex::new(HashSet::new()),
            events: options.events,
        });

        let worker_state = state.clone();
        let queue = ActionQueue::new(move |id, action| {
            let state = worker_state.clone();
            async move { state.run(ActionRecord { id, action }).await }.boxed()
        });

        Self { state, queue }
    }

    /// Post an action whose progress is reported through events
    fn post_tracked(&self, action: Action) -> ActionId {
        let mut tracked = lock(&self.state.tracked);
        let id = self.queue.post(action);
        // rejected posts never reach the worker
        if self.queue.status(id) != ActionStatus::Failed {
            tracked.insert(id);
        }
        id
    }

    async fn run_untracked(&self, action: Action) -> bool {
        self.queue.post_and_wait(action).await == ActionStatus::Success
    }

    pub fn post_connection(&self) -> ActionId {
        self.post_tracked(Action::Connect)
    }

    pub fn post_click(&self, x: i32, y: i32) -> ActionId {
        self.post_tracked(Action::Click { x, y })
    }

    /// Post a swipe through `(xs[i], ys[i])`, pausing `delays[i]` ms at each point
    pub fn post_swipe(&self, xs: &[i32], ys: &[i32], delays: &[u64]) -> ActionId {
        if xs.len() != ys.len() || xs.len() != delays.len() {
            warn!(
                "swipe argument lengths differ: {} {} {}",
                xs.len(),
                ys.len(),
                delays.len()
            );
        }
        let steps = xs
            .iter()
            .zip(ys)
            .zip(delays)
            .map(|((&x, &y), &delay)| SwipeStep { x, y, delay })
            .collect();
        self.post_tracked(Action::Swipe { steps })
    }

    pub fn post_press_key(&self, key: i32) -> ActionId {
        self.post_tracked(Action::PressKey { key })
    }

    pub fn post_screencap(&self) -> ActionId {
        self.post_tracked(Action::Screencap)
    }

    pub fn post_start_app(&self, intent: impl Into<String>) -> ActionId {
        self.post_tracked(Action::StartApp {
            intent: intent.into(),
        })
    }

    pub fn post_stop_app(&self, intent: impl Into<String>) -> ActionId {
        self.post_tracked(Action::StopApp {
            intent: intent.into(),
        })
    }

    pub fn status(&self, id: ActionId) -> ActionStatus {
        self.queue.status(id)
    }

    pub async fn wait(&self, id: ActionId) -> ActionStatus {
        self.queue.wait(id).await
    }

    pub fn running(&self) -> bool {
        self.queue.running()
    }

    pub fn connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Most recent captured frame, after target-size scaling
    pub fn get_image_cache(&self) -> Option<CapturedFrame> {
        lock(&self.state.image_cache).clone()
    }

    pub fn get_uuid(&self) -> Option<String> {
        self.state.uuid()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        *lock(&self.state.resolution)
    }

    /// Click a random point inside `rect`
    pub async fn click_rect(&self, rect: Rect) -> bool {
        let (x, y) = rand_point(rect);
        self.click_point(x, y).await
    }

    pub async fn click_point(&self, x: i32, y: i32) -> bool {
        self.run_untracked(Action::Click { x, y }).await
    }

    /// Swipe between random points of two rects over `duration` ms
    pub async fn swipe_rect(&self, from: Rect, to: Rect, duration: u64) -> bool {
        let start = rand_point(from);
        let end = rand_point(to);
        self.swipe_points(start, end, duration).await
    }

    /// Swipe along a smooth-step curve sampled every 2 ms
    pub async fn swipe_points(&self, from: (i32, i32), to: (i32, i32), duration: u64) -> bool {
        let steps = smooth_swipe(from, to, duration);
        self.run_untracked(Action::Swipe { steps }).await
    }

    pub async fn press_key(&self, key: i32) -> bool {
        self.run_untracked(Action::PressKey { key }).await
    }

    pub async fn start_app(&self, intent: impl Into<String>) -> bool {
        self.run_untracked(Action::StartApp {
            intent: intent.into(),
        })
        .await
    }

    pub async fn stop_app(&self, intent: impl Into<String>) -> bool {
        self.run_untracked(Action::StopApp {
            intent: intent.into(),
        })
        .await
    }

    /// Capture a frame and return it
    pub async fn screencap(&self) -> Option<CapturedFrame> {
        if !self.run_untracked(Action::Screencap).await {
            return None;
        }
        self.get_image_cache()
    }

    /// Stop the queue; pending actions fail, the running one completes
    pub fn release(&self) {
        self.queue.release();
    }
}

/// Random point in `rect`, Poisson-distributed around the centre
fn rand_point(rect: Rect) -> (i32, i32) {
    let mut rng = rand::thread_rng();
    (
        rect.x + poisson_offset(&mut rng, rect.width),
        rect.y + poisson_offset(&mut rng, rect.height),
    )
}

fn poisson_offset(rng: &mut impl Rng, extent: i32) -> i32 {
    if extent <= 0 {
        return 0;
    }
    let mean = f64::from(extent) / 2.0;
    match Poisson::new(mean) {
        Ok(poisson) => (poisson.sample(rng) as i32).min(extent - 1),
        Err(_) => extent / 2,
    }
}

/// Points from `from` to `to` eased with `3t² - 2t³`
fn smooth_swipe(from: (i32, i32), to: (i32, i32), duration: u64) -> Vec<SwipeStep> {
    let count = (duration / SWIPE_SAMPLE_MS).max(1);
    (0..=count)
        .map(|i| {
            let t = i as f64 / count as f64;
            let eased = t * t * (3.0 - 2.0 * t);
            let lerp = |a: i32, b: i32| (f64::from(a) + f64::from(b - a) * eased).round() as i32;
            SwipeStep {
                x: lerp(from.0, to.0),
                y: lerp(from.1, to.1),
                delay: SWIPE_SAMPLE_MS,
            }
        })
        .collect()
}
