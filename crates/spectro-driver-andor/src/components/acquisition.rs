//! Acquisition Polling
//!
//! Drives one acquisition to completion: start, poll `GetStatus` at a fixed
//! interval, fetch the samples once the detector reports completion.
//!
//! ## Status Protocol
//!
//! | Code                | Meaning          | Poller action                          |
//! |---------------------|------------------|----------------------------------------|
//! | `acquiring` (20072) | still exposing   | sleep one interval, poll again         |
//! | `complete` (20073)  | idle, data ready | fetch `width * height`, return `Data`  |
//! | anything else       | terminal failure | return `DeviceError(code)`, no fetch   |
//!
//! There is no timeout. A device that never leaves ACQUIRING keeps the caller
//! waiting until [`AbortSignal::raise`] is called from elsewhere.

use spectro_core::data::{AcquisitionResult, Frame};
use spectro_core::device::{Detector, DRV_ACQUIRING, DRV_IDLE};
use spectro_core::error::SpectroResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Status codes that drive the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusProtocol {
    /// Keep polling.
    pub acquiring: i32,
    /// Fetch the data.
    pub complete: i32,
}

impl StatusProtocol {
    /// Andor SDK codes.
    pub const ANDOR: Self = Self {
        acquiring: DRV_ACQUIRING,
        complete: DRV_IDLE,
    };
}

impl Default for StatusProtocol {
    fn default() -> Self {
        Self::ANDOR
    }
}

/// Cross-task abort request for the in-flight acquisition.
///
/// Raising it never touches the session guard; the poller observes it
/// between status polls.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// A signal with no pending request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether an abort is pending.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Take the pending request, if any.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Single-acquisition driver shared by every acquisition path.
#[derive(Debug, Clone)]
pub struct Poller {
    protocol: StatusProtocol,
    interval: Duration,
}

impl Poller {
    /// Poller that sleeps `interval` between `GetStatus` calls.
    pub fn new(protocol: StatusProtocol, interval: Duration) -> Self {
        Self { protocol, interval }
    }

    /// Delay between status polls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one acquisition of a `width x height` window.
    ///
    /// Abort requests raised before this call are discarded. Device faults from
    /// `StartAcquisition`, `GetStatus` or `GetAcquiredData` become
    /// `DeviceError(code)`. The only `Err` is a fetch that returns the wrong
    /// number of samples.
    ///
    /// Dropping the returned future after the detector has started sends
    /// `AbortAcquisition`, so a caller's timeout leaves the detector idle.
    pub async fn acquire(
        &self,
        detector: &mut dyn Detector,
        width: u32,
        height: u32,
        abort: &AbortSignal,
    ) -> SpectroResult<AcquisitionResult> {
        abort.clear();
        if let Err(fault) = detector.start_acquisition() {
            tracing::warn!(%fault, "StartAcquisition rejected");
            return Ok(AcquisitionResult::DeviceError(fault.code));
        }

        let mut running = StopOnDrop {
            detector,
            armed: true,
        };
        let result = self
            .poll_to_completion(&mut *running.detector, width, height, abort)
            .await;
        running.armed = false;
        result
    }

    async fn poll_to_completion(
        &self,
        detector: &mut dyn Detector,
        width: u32,
        height: u32,
        abort: &AbortSignal,
    ) -> SpectroResult<AcquisitionResult> {
        let mut polls: u64 = 0;
        loop {
            if abort.take() {
                return Ok(self.stop(detector));
            }

            let code = match detector.status() {
                Ok(code) => code,
                Err(fault) => {
                    tracing::warn!(%fault, polls, "GetStatus failed");
                    return Ok(AcquisitionResult::DeviceError(fault.code));
                }
            };
            polls += 1;

            if code == self.protocol.acquiring {
                tracing::trace!(polls, "Acquiring");
                tokio::time::sleep(self.interval).await;
                continue;
            }
            if code != self.protocol.complete {
                tracing::warn!(code, polls, "Acquisition ended with device error");
                return Ok(AcquisitionResult::DeviceError(code));
            }

            let len = width as usize * height as usize;
            let samples = match detector.acquired_data(len) {
                Ok(samples) => samples,
                Err(fault) => {
                    tracing::warn!(%fault, "GetAcquiredData failed");
                    return Ok(AcquisitionResult::DeviceError(fault.code));
                }
            };
            tracing::debug!(polls, width, height, "Acquisition complete");
            return Ok(AcquisitionResult::Data(Frame::new(width, height, samples)?));
        }
    }

    fn stop(&self, detector: &mut dyn Detector) -> AcquisitionResult {
        match detector.abort_acquisition() {
            Ok(()) => {
                tracing::info!("Acquisition aborted");
                AcquisitionResult::Aborted
            }
            // Finished on its own between the last poll and the abort.
            Err(fault) if fault.code == self.protocol.complete => {
                tracing::info!("Acquisition aborted after completion");
                AcquisitionResult::Aborted
            }
            Err(fault) => {
                tracing::warn!(%fault, "AbortAcquisition failed");
                AcquisitionResult::DeviceError(fault.code)
            }
        }
    }
}

/// Halts a started acquisition if the poll loop is dropped before it returns.
struct StopOnDrop<'a> {
    detector: &'a mut dyn Detector,
    armed: bool,
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Acquisition cancelled while running, sending AbortAcquisition");
        if let Err(fault) = self.detector.abort_acquisition() {
            tracing::warn!(%fault, "AbortAcquisition failed after cancellation");
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(StatusProtocol::ANDOR, Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectro_driver_mock::{DetectorCall, FaultScenario, MockDetector};
    use tokio::time::Instant;

    fn ready_detector() -> MockDetector {
        let mut detector = MockDetector::default();
        detector.initialize().unwrap();
        detector
    }

    fn fetches(detector: &MockDetector) -> usize {
        detector.call_count(|c| matches!(c, DetectorCall::GetAcquiredData(_)))
    }

    #[tokio::test]
    async fn completes_after_acquiring_codes() {
        let mut detector = ready_detector();
        detector.script_status([DRV_ACQUIRING, DRV_ACQUIRING, DRV_IDLE]);
        let poller = Poller::new(StatusProtocol::ANDOR, Duration::from_millis(1));

        let result = poller
            .acquire(&mut detector, 512, 512, &AbortSignal::new())
            .await
            .unwrap();

        let frame = result.into_frame().unwrap();
        assert_eq!((frame.width, frame.height), (512, 512));
        assert_eq!(frame.pixels.len(), 512 * 512);
        assert_eq!(
            detector.call_count(|c| matches!(c, DetectorCall::GetStatus)),
            3
        );
    }

    #[tokio::test]
    async fn unknown_code_is_terminal_without_fetch() {
        let mut detector = ready_detector();
        detector.script_status([DRV_ACQUIRING, 42]);
        let poller = Poller::new(StatusProtocol::ANDOR, Duration::from_millis(1));

        let result = poller
            .acquire(&mut detector, 512, 512, &AbortSignal::new())
            .await
            .unwrap();

        assert_eq!(result, AcquisitionResult::DeviceError(42));
        assert_eq!(fetches(&detector), 0);
    }

    #[tokio::test]
    async fn start_failure_is_a_device_error() {
        let mut detector = ready_detector();
        detector.faults().inject(FaultScenario::Once {
            operation: "StartAcquisition",
            code: 20013,
        });
        let result = Poller::default()
            .acquire(&mut detector, 8, 8, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(result, AcquisitionResult::DeviceError(20013));
    }

    #[tokio::test]
    async fn abort_is_observed_within_one_interval() {
        let mut detector = ready_detector();
        detector.hold_acquiring(true);
        let interval = Duration::from_millis(20);
        let poller = Poller::new(StatusProtocol::ANDOR, interval);
        let abort = AbortSignal::new();

        let remote = abort.clone();
        let raised_at = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            remote.raise();
            Instant::now()
        });

        let result = poller.acquire(&mut detector, 8, 8, &abort).await.unwrap();
        let finished_at = Instant::now();
        let raised_at = raised_at.await.unwrap();

        assert!(result.is_aborted());
        assert!(finished_at.duration_since(raised_at) <= interval * 2);
        assert!(!detector.is_acquiring());
        assert_eq!(fetches(&detector), 0);
    }

    #[tokio::test]
    async fn stale_abort_does_not_cancel_next_acquisition() {
        let mut detector = ready_detector();
        let abort = AbortSignal::new();
        abort.raise();
        let result = Poller::new(StatusProtocol::ANDOR, Duration::from_millis(1))
            .acquire(&mut detector, 4, 4, &abort)
            .await
            .unwrap();
        assert!(result.frame().is_some());
    }

    #[tokio::test]
    async fn dropped_acquisition_is_aborted() {
        let mut detector = ready_detector();
        detector.hold_acquiring(true);
        let poller = Poller::new(StatusProtocol::ANDOR, Duration::from_millis(5));

        let outcome = tokio::time::timeout(
            Duration::from_millis(30),
            poller.acquire(&mut detector, 8, 8, &AbortSignal::new()),
        )
        .await;

        assert!(outcome.is_err());
        assert!(!detector.is_acquiring());
        assert_eq!(
            detector.call_count(|c| matches!(c, DetectorCall::AbortAcquisition)),
            1
        );
    }

    #[tokio::test]
    async fn finished_acquisition_is_not_aborted_again() {
        let mut detector = ready_detector();
        let poller = Poller::new(StatusProtocol::ANDOR, Duration::from_millis(1));

        let result = poller
            .acquire(&mut detector, 4, 4, &AbortSignal::new())
            .await
            .unwrap();

        assert!(result.frame().is_some());
        assert_eq!(
            detector.call_count(|c| matches!(c, DetectorCall::AbortAcquisition)),
            0
        );
    }
}
