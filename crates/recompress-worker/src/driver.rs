//! The driver loop hosted on a tokio task.
//!
//! [`spawn`] moves a [`Driver`] onto its own task and returns a
//! [`DriverHandle`]. The task waits on three things at once: inputs
//! from handles, the armed frame timer, and the outstanding encode job.
//! Whatever the driver asks for in response (arm, cancel, dispatch) is
//! carried out right there, and the resulting state is published on a
//! `watch` channel. Per-iteration outcomes go out on a `broadcast`
//! channel for anyone who wants to follow along.

use std::future::pending;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use recompress_pipeline::{
    Codec, Command, DiscardReason, Driver, DriverState, EncodeError, EncodeResult, Format,
    ImageFormat, IterationRecord, JobOutcome, PipelineError, QualityRange, RecompressConfig,
    RgbaImage,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::encode::{EncodeWorker, join_failure};

const INPUT_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Errors from talking to a driver task.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The driver task has stopped.
    #[error("driver task is no longer running")]
    Closed,

    /// A parameter was rejected before reaching the driver.
    #[error(transparent)]
    InvalidConfig(#[from] PipelineError),
}

/// Published state of the loop.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The source image, once one is selected.
    pub original: Option<Arc<RgbaImage>>,
    /// Latest compressed image since the last reset.
    pub compressed: Option<Arc<RgbaImage>>,
    /// Count and last quality since the last reset.
    pub stats: IterationRecord,
    /// Where the state machine is.
    pub state: DriverState,
    /// Whether iteration is switched on.
    pub enabled: bool,
}

impl Snapshot {
    fn of(driver: &Driver) -> Self {
        let display = driver.current_display_image();
        Self {
            original: display.original,
            compressed: display.compressed,
            stats: driver.iteration_stats(),
            state: driver.state(),
            enabled: driver.is_enabled(),
        }
    }
}

/// What happened to one job, as broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A result became the new compressed image.
    Applied {
        count: u64,
        quality: f64,
        format: ImageFormat,
        elapsed: Duration,
        image: Arc<RgbaImage>,
    },
    /// A job failed; the loop carries on with the previous image.
    Failed { error: EncodeError },
    /// A result was dropped without touching state.
    Discarded { reason: DiscardReason },
    /// Iteration stopped on its own (limit reached), was refused
    /// because the limit is already reached, or the task exited.
    Stopped,
}

enum Input {
    SelectImage(RgbaImage),
    SetIterating(bool),
    SetQualityRange(QualityRange),
    SetFormat(Format),
    SetFrameInterval(Duration),
    Reset,
    Shutdown,
}

/// Cheap, cloneable handle to a running driver task.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    inputs: mpsc::Sender<Input>,
    snapshot: watch::Receiver<Snapshot>,
    events: broadcast::Sender<DriverEvent>,
}

impl DriverHandle {
    /// Replace the source image. Clears compressed state; iteration
    /// continues on the new image if it was on.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the driver task has stopped.
    pub async fn select_image(&self, image: RgbaImage) -> Result<(), WorkerError> {
        self.send(Input::SelectImage(image)).await
    }

    /// Switch iteration on or off.
    ///
    /// Once the iteration limit is reached, switching on is refused and
    /// answered with [`DriverEvent::Stopped`]; [`reset`](Self::reset)
    /// first to iterate again.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the driver task has stopped.
    pub async fn set_iterating(&self, enabled: bool) -> Result<(), WorkerError> {
        self.send(Input::SetIterating(enabled)).await
    }

    /// Change the quality range used by the next dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidConfig`] if the bounds are not a
    /// valid range, or [`WorkerError::Closed`] if the task has stopped.
    pub async fn set_quality_range(&self, min: f64, max: f64) -> Result<(), WorkerError> {
        let range = QualityRange::new(min, max)?;
        self.send(Input::SetQualityRange(range)).await
    }

    /// Change the output format used by the next dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the driver task has stopped.
    pub async fn set_format(&self, format: Format) -> Result<(), WorkerError> {
        self.send(Input::SetFormat(format)).await
    }

    /// Change the delay between a result and the next dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the driver task has stopped.
    pub async fn set_frame_interval(&self, interval: Duration) -> Result<(), WorkerError> {
        self.send(Input::SetFrameInterval(interval)).await
    }

    /// Drop the compressed image and zero the count. A result still in
    /// flight is discarded when it lands.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the driver task has stopped.
    pub async fn reset(&self) -> Result<(), WorkerError> {
        self.send(Input::Reset).await
    }

    /// Ask the task to exit. An encode already running finishes on the
    /// blocking pool and is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the driver task has stopped.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.send(Input::Shutdown).await
    }

    /// The most recently published state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until the published state satisfies `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the task stops first.
    pub async fn wait_for(
        &self,
        condition: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, WorkerError> {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver
            .wait_for(condition)
            .await
            .map_err(|_| WorkerError::Closed)?;
        Ok(snapshot.clone())
    }

    /// Receive every [`DriverEvent`] from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn send(&self, input: Input) -> Result<(), WorkerError> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| WorkerError::Closed)
    }
}

/// Start a driver task on the current tokio runtime.
///
/// The driver starts disabled and without an image. `seed` makes the
/// sampled qualities and formats reproducible.
///
/// # Errors
///
/// Returns [`WorkerError::InvalidConfig`] if `config` fails validation.
pub fn spawn(
    config: &RecompressConfig,
    codec: Arc<dyn Codec>,
    seed: Option<u64>,
) -> Result<(DriverHandle, JoinHandle<()>), WorkerError> {
    config.validate()?;

    let driver = Driver::new(config);
    let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::of(&driver));
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

    let task = DriverTask {
        driver,
        worker: EncodeWorker::new(codec, seed),
        inputs: input_rx,
        snapshot: snapshot_tx,
        events: event_tx.clone(),
        timer: None,
        job: None,
    };
    let join = tokio::spawn(task.run());

    let handle = DriverHandle {
        inputs: input_tx,
        snapshot: snapshot_rx,
        events: event_tx,
    };
    Ok((handle, join))
}

struct DriverTask {
    driver: Driver,
    worker: EncodeWorker,
    inputs: mpsc::Receiver<Input>,
    snapshot: watch::Sender<Snapshot>,
    events: broadcast::Sender<DriverEvent>,
    timer: Option<Pin<Box<Sleep>>>,
    job: Option<JoinHandle<EncodeResult>>,
}

impl DriverTask {
    async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                biased;

                input = self.inputs.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => ControlFlow::Break(()),
                },
                joined = wait_job(&mut self.job) => {
                    self.job = None;
                    self.handle_result(joined);
                    ControlFlow::Continue(())
                }
                () = wait_timer(&mut self.timer) => {
                    self.timer = None;
                    let command = self.driver.timer_fired();
                    self.execute(command);
                    ControlFlow::Continue(())
                }
            };
            self.publish();
            if flow.is_break() {
                break;
            }
        }

        info!("driver stopped after {} iterations", self.driver.iteration_stats().count);
        let _ = self.events.send(DriverEvent::Stopped);
    }

    fn handle_input(&mut self, input: Input) -> ControlFlow<()> {
        let command = match input {
            Input::SelectImage(image) => {
                info!("source image {}×{}", image.width(), image.height());
                self.driver.set_original(image)
            }
            Input::SetIterating(enabled) => {
                debug!("iteration {}", if enabled { "on" } else { "off" });
                let command = self.driver.set_enabled(enabled);
                if enabled && !self.driver.is_enabled() && self.driver.limit_reached() {
                    warn!("iteration limit already reached, reset to iterate again");
                    let _ = self.events.send(DriverEvent::Stopped);
                }
                command
            }
            Input::SetQualityRange(range) => {
                self.driver.set_quality_range(range);
                None
            }
            Input::SetFormat(format) => {
                self.driver.set_format(format);
                None
            }
            Input::SetFrameInterval(interval) => {
                self.driver.set_frame_interval(interval);
                None
            }
            Input::Reset => {
                debug!("reset");
                self.driver.reset()
            }
            Input::Shutdown => return ControlFlow::Break(()),
        };
        self.execute(command);
        ControlFlow::Continue(())
    }

    fn handle_result(&mut self, joined: Result<EncodeResult, JoinError>) {
        let result = joined.unwrap_or_else(join_failure);
        let was_enabled = self.driver.is_enabled();
        let completion = self.driver.job_completed(result);

        let event = match completion.outcome {
            JobOutcome::Applied {
                record,
                format,
                elapsed,
            } => {
                let quality = record.last_quality.unwrap_or_default();
                info!(
                    "iteration {}: {format} at quality {quality:.3} in {elapsed:?}",
                    record.count
                );
                self.driver
                    .feedback()
                    .compressed()
                    .map(|image| DriverEvent::Applied {
                        count: record.count,
                        quality,
                        format,
                        elapsed,
                        image: Arc::clone(image),
                    })
            }
            JobOutcome::Failed(error) => {
                warn!("iteration failed: {error}");
                Some(DriverEvent::Failed { error })
            }
            JobOutcome::Discarded(reason) => {
                debug!("result discarded: {reason}");
                Some(DriverEvent::Discarded { reason })
            }
        };
        self.execute(completion.command);

        // Subscribers must never see an event ahead of the state it describes.
        self.publish();
        if let Some(event) = event {
            let _ = self.events.send(event);
        }

        // Only the iteration limit turns the driver off inside job_completed.
        if was_enabled && !self.driver.is_enabled() {
            info!("iteration limit reached");
            let _ = self.events.send(DriverEvent::Stopped);
        }
    }

    fn execute(&mut self, command: Option<Command>) {
        match command {
            Some(Command::ArmTimer(delay)) => {
                self.timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Some(Command::CancelTimer) => self.timer = None,
            Some(Command::Dispatch(job)) => self.job = Some(self.worker.dispatch(job)),
            None => {}
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(Snapshot::of(&self.driver));
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}

async fn wait_job(job: &mut Option<JoinHandle<EncodeResult>>) -> Result<EncodeResult, JoinError> {
    match job {
        Some(handle) => handle.await,
        None => pending().await,
    }
}
