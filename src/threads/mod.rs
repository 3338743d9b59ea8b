//! Threaded pipeline: projection worker, association worker, channels.
//!
//! ```text
//! raw scans ──► [projection thread] ──ProjectionOutput──► [odometry thread] ──► mapping sink
//! IMU samples ──────────────────────────────────────────────► (locked ring buffer)
//! ```
//!
//! Each worker owns its private state and blocks on its input channel;
//! stages overlap across scans. Shutdown is signaled by an empty sentinel
//! message pushed down the same channels, and the pipeline handle joins
//! both workers on drop, even on unwind.

use crate::algorithms::projection::{ProjectionOutput, ScanProjector};
use crate::config::PipelineConfig;
use crate::core::types::{LaserOdometry, Point};
use crate::engine::{AssociationOutput, ScanOdometry};
use crate::sensors::imu::{ImuBuffer, ImuHandle, SharedImuBuffer};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// Capacity of the inter-stage channels; one in flight per stage keeps
/// the stages pipelined without unbounded buffering.
const CHANNEL_CAPACITY: usize = 2;

/// Errors surfaced by the pipeline handle.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The receiving worker is gone; the pipeline has shut down.
    #[error("pipeline channel closed")]
    ChannelClosed,
}

/// One raw scan from the transport layer. An empty point set doubles as
/// the shutdown sentinel.
#[derive(Debug, Clone, Default)]
pub struct RawScan {
    /// Acquisition time in seconds.
    pub stamp: f64,
    /// Unordered returns in the sensor frame.
    pub points: Vec<Point>,
}

impl RawScan {
    fn is_sentinel(&self) -> bool {
        self.points.is_empty()
    }
}

fn projection_is_sentinel(out: &ProjectionOutput) -> bool {
    out.segmented_cloud.is_empty() && out.seg_info.start_ring_index.is_empty()
}

/// Handle to the running two-stage odometry pipeline.
///
/// Feed scans with [`OdometryPipeline::submit_scan`] and IMU samples via
/// the cloneable [`ImuHandle`]; read per-scan odometry and the
/// reduced-rate mapping bundles from the output receivers. Dropping the
/// handle sends the sentinel and joins both workers.
#[derive(Debug)]
pub struct OdometryPipeline {
    scan_tx: Sender<RawScan>,
    imu: ImuHandle,
    odometry_rx: Receiver<LaserOdometry>,
    mapping_rx: Receiver<AssociationOutput>,
    projection_handle: Option<JoinHandle<()>>,
    odometry_handle: Option<JoinHandle<()>>,
}

impl OdometryPipeline {
    /// Spawn both workers with the given configuration.
    pub fn spawn(config: PipelineConfig) -> Self {
        let (scan_tx, scan_rx) = bounded::<RawScan>(CHANNEL_CAPACITY);
        let (projection_tx, projection_rx) = bounded::<ProjectionOutput>(CHANNEL_CAPACITY);
        let (odometry_tx, odometry_rx) = bounded::<LaserOdometry>(CHANNEL_CAPACITY * 8);
        let (mapping_tx, mapping_rx) = bounded::<AssociationOutput>(CHANNEL_CAPACITY * 8);

        let imu_buffer: SharedImuBuffer = Arc::new(Mutex::new(ImuBuffer::new(
            config.imu.queue_length,
            config.scan.scan_period,
        )));
        let imu = ImuHandle::new(imu_buffer.clone());

        let projector_config = config.scan.clone();
        let projection_handle = std::thread::Builder::new()
            .name("projection".into())
            .spawn(move || run_projection(projector_config, scan_rx, projection_tx))
            .expect("failed to spawn projection thread");

        let odometry_handle = std::thread::Builder::new()
            .name("odometry".into())
            .spawn(move || {
                run_odometry(config, projection_rx, imu_buffer, odometry_tx, mapping_tx)
            })
            .expect("failed to spawn odometry thread");

        Self {
            scan_tx,
            imu,
            odometry_rx,
            mapping_rx,
            projection_handle: Some(projection_handle),
            odometry_handle: Some(odometry_handle),
        }
    }

    /// Submit one raw scan; blocks when the projection stage is busy with
    /// the previous two.
    pub fn submit_scan(&self, scan: RawScan) -> Result<(), PipelineError> {
        self.scan_tx
            .send(scan)
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Cloneable IMU ingestion handle for the sensor callback thread.
    pub fn imu_handle(&self) -> ImuHandle {
        self.imu.clone()
    }

    /// Per-scan odometry estimates.
    pub fn odometry_output(&self) -> &Receiver<LaserOdometry> {
        &self.odometry_rx
    }

    /// Reduced-rate feature bundles for the mapping stage.
    pub fn mapping_output(&self) -> &Receiver<AssociationOutput> {
        &self.mapping_rx
    }

    /// Send the shutdown sentinel and join both workers.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        // Push the sentinel while draining the output channels: a worker
        // blocked on a full output must be able to make progress toward
        // the sentinel, otherwise the join below would wedge.
        let mut sentinel = Some(RawScan::default());
        loop {
            if let Some(s) = sentinel.take() {
                if let Err(crossbeam_channel::TrySendError::Full(s)) = self.scan_tx.try_send(s) {
                    sentinel = Some(s);
                }
                // disconnected means the workers are already gone
            }
            while self.mapping_rx.try_recv().is_ok() {}
            while self.odometry_rx.try_recv().is_ok() {}

            let workers_done = self
                .projection_handle
                .as_ref()
                .map_or(true, |h| h.is_finished())
                && self
                    .odometry_handle
                    .as_ref()
                    .map_or(true, |h| h.is_finished());
            if workers_done {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        if let Some(handle) = self.projection_handle.take() {
            if handle.join().is_err() {
                log::error!("projection thread panicked");
            }
        }
        if let Some(handle) = self.odometry_handle.take() {
            if handle.join().is_err() {
                log::error!("odometry thread panicked");
            }
        }
    }
}

impl Drop for OdometryPipeline {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Projection worker: raw scans in, segmented scans out.
fn run_projection(
    config: crate::config::ScanConfig,
    scan_rx: Receiver<RawScan>,
    projection_tx: Sender<ProjectionOutput>,
) {
    log::info!("projection thread started");
    let mut projector = ScanProjector::new(config);

    loop {
        let scan = match scan_rx.recv() {
            Ok(scan) => scan,
            Err(_) => break, // producer gone
        };
        if scan.is_sentinel() {
            break;
        }

        let output = projector.process(scan.stamp, &scan.points);
        if projection_tx.send(output).is_err() {
            break; // consumer gone
        }
    }

    // wake the downstream worker so it can exit too
    let _ = projection_tx.send(ProjectionOutput::default());
    log::info!("projection thread stopped");
}

/// Association worker: segmented scans in, odometry + mapping bundles out.
fn run_odometry(
    config: PipelineConfig,
    projection_rx: Receiver<ProjectionOutput>,
    imu_buffer: SharedImuBuffer,
    odometry_tx: Sender<LaserOdometry>,
    mapping_tx: Sender<AssociationOutput>,
) {
    log::info!("odometry thread started");
    let mut engine = ScanOdometry::new(config);

    loop {
        let projection = match projection_rx.recv() {
            Ok(p) => p,
            Err(_) => break,
        };
        if projection_is_sentinel(&projection) {
            break;
        }

        // hold the IMU lock for the whole scan: the samples observed are
        // exactly those delivered before this section was entered
        let result = {
            let imu = imu_buffer.lock();
            engine.process(projection, &imu)
        };

        if let Some(odometry) = result.odometry {
            // odometry consumers are lossy subscribers; never stall the
            // pipeline on a slow one
            if odometry_tx.try_send(odometry).is_err() {
                log::debug!("odometry output full, dropping estimate");
            }
        }
        if let Some(mapping) = result.mapping {
            if mapping_tx.send(mapping).is_err() {
                break; // mapping sink gone
            }
        }
    }

    log::info!("odometry thread stopped");
}
