//! Device Connection Management
//!
//! Handles bring-up and teardown of the detector/spectrograph pair and the
//! process-wide claim that keeps two sessions off the same hardware.
//!
//! ## Device Claims
//!
//! The vendor SDKs keep global state per physical device, so a second session
//! over a device that is already open would silently share (and corrupt) it.
//! Every session claims both device ids in a process-wide registry before
//! touching the hardware; the claim is released when the session's devices are
//! released.

use parking_lot::{const_mutex, Mutex};
use spectro_core::device::{Detector, Spectrograph};
use spectro_core::error::{DeviceKind, SpectroError, SpectroResult};
use std::collections::BTreeSet;
use std::time::Duration;

/// Device ids owned by live sessions, as `"<kind>:<id>"`.
static CLAIMED_DEVICES: Mutex<BTreeSet<String>> = const_mutex(BTreeSet::new());

/// Exclusive ownership of one detector/spectrograph pair.
///
/// Released on drop.
#[derive(Debug)]
pub(crate) struct DeviceClaim {
    keys: Vec<String>,
}

impl DeviceClaim {
    /// Claim both ids atomically: either both are claimed or neither.
    pub(crate) fn acquire(detector_id: &str, spectrograph_id: &str) -> SpectroResult<Self> {
        let keys = vec![
            format!("{}:{}", DeviceKind::Detector, detector_id),
            format!("{}:{}", DeviceKind::Spectrograph, spectrograph_id),
        ];

        let mut claimed = CLAIMED_DEVICES.lock();
        if let Some(taken) = keys.iter().find(|key| claimed.contains(*key)) {
            return Err(SpectroError::SessionAlreadyOpen {
                device_id: taken.clone(),
            });
        }
        claimed.extend(keys.iter().cloned());
        Ok(Self { keys })
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claimed = CLAIMED_DEVICES.lock();
        for key in &self.keys {
            claimed.remove(key);
        }
    }
}

/// The two device handles of an open session, both initialized.
pub(crate) struct Devices {
    pub(crate) detector: Box<dyn Detector>,
    pub(crate) spectrograph: Box<dyn Spectrograph>,
    claim: DeviceClaim,
}

impl Devices {
    /// Claim and initialize both devices.
    ///
    /// The spectrograph is initialized `settle_delay` after the detector. If
    /// either fails, or the returned future is dropped part way, whichever
    /// device did come up is shut down and the claim is released.
    pub(crate) async fn bring_up(
        mut detector: Box<dyn Detector>,
        mut spectrograph: Box<dyn Spectrograph>,
        settle_delay: Duration,
    ) -> SpectroResult<Self> {
        let claim = DeviceClaim::acquire(&detector.device_id(), &spectrograph.device_id())?;

        tracing::info!(detector = %detector.device_id(), "Initializing detector");
        detector
            .initialize()
            .map_err(|fault| SpectroError::InitializationFailure {
                device: DeviceKind::Detector,
                fault,
            })?;
        let unwind = ShutdownOnDrop {
            detector: &mut *detector,
            armed: true,
        };

        if !settle_delay.is_zero() {
            tracing::debug!(?settle_delay, "Waiting for detector to settle");
            tokio::time::sleep(settle_delay).await;
        }

        tracing::info!(spectrograph = %spectrograph.device_id(), "Initializing spectrograph");
        spectrograph
            .initialize()
            .map_err(|fault| SpectroError::InitializationFailure {
                device: DeviceKind::Spectrograph,
                fault,
            })?;
        unwind.disarm();

        Ok(Self {
            detector,
            spectrograph,
            claim,
        })
    }

    /// Shut down both devices and release the claim.
    ///
    /// Both shutdowns are attempted even if the first fails; failures are
    /// logged, never returned.
    pub(crate) fn release(mut self) {
        if let Err(e) = self.detector.shutdown() {
            tracing::warn!(error = %e, "Detector shutdown failed");
        }
        if let Err(e) = self.spectrograph.shutdown() {
            tracing::warn!(error = %e, "Spectrograph shutdown failed");
        }
        tracing::info!(claim = ?self.claim.keys, "Devices released");
    }
}

/// Shuts down a detector initialized by an open that never completed.
///
/// Declared after the claim in `bring_up`, so it runs before the claim is
/// released.
struct ShutdownOnDrop<'a> {
    detector: &'a mut dyn Detector,
    armed: bool,
}

impl ShutdownOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ShutdownOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.detector.shutdown() {
            tracing::warn!(error = %e, "Detector shutdown failed while unwinding open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_exclusive_and_released_on_drop() {
        let first = DeviceClaim::acquire("claim-test-ccd", "claim-test-sr").unwrap();

        let err = DeviceClaim::acquire("claim-test-ccd", "claim-test-sr-2").unwrap_err();
        assert!(matches!(err, SpectroError::SessionAlreadyOpen { .. }));
        // The failed attempt must not leave its spectrograph claimed.
        let other = DeviceClaim::acquire("claim-test-ccd-2", "claim-test-sr-2").unwrap();

        drop(first);
        drop(other);
        assert!(DeviceClaim::acquire("claim-test-ccd", "claim-test-sr").is_ok());
    }
}
