//! Boot decision, run once at every device start.
//!
//! Three phases run in order: promotion of a staged image, verification of the primary image,
//! and restoration of the primary image from the backup slot when it is still not valid.
//! A verification result of the primary image obtained while promoting is reused afterwards.

use crate::{
    Bootloader, Error, FlashDevice, Slot,
    entry::EntryCheck,
    log,
    state::{BootReport, BootState},
};

/// Transport delivering command blocks while in update mode.
pub trait Transport {
    /// Bring up the transport. A failure leaves the device in [`BootState::ErrorState`].
    fn initialize(&mut self) -> Result<(), Error>;
}

/// Verification result of the primary slot, once known.
type PrimaryCheck = Option<Result<(), Error>>;

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Decide whether to boot the application or stay in update mode.
    pub async fn decide<T: Transport, E: EntryCheck>(
        &mut self,
        transport: &mut T,
        entry: &mut E,
    ) -> BootReport {
        if let Err(e) = transport.initialize() {
            log::error!("transport initialization failed: {:?}", e);
            return BootReport::new(BootState::ErrorState, Err(e));
        }

        if entry.forced() {
            log::info!("update mode forced");
            return BootReport::new(BootState::Bootloader, Ok(()));
        }

        let mut primary: PrimaryCheck = None;
        let mut report = BootReport::new(BootState::Bootloader, Ok(()));

        let (status, promoted) = self.promote_staged(&mut primary).await;
        log::info!("promotion: {:?}, performed {:?}", status, promoted);
        report.promoted = promoted;

        report.status = match primary {
            Some(checked) => checked,
            None => self.verify(Slot::PRIMARY).await,
        };
        if report.status.is_ok() {
            report.status = self.check_primary_version().await;
        }
        log::info!("primary image: {:?}", report.status);

        if report.status.is_ok() {
            report.state = BootState::Application;
            return report;
        }

        if let Some(backup) = self.config.backup {
            let (status, restored) = self.restore_backup(backup).await;
            log::info!("restoration: {:?}, performed {:?}", status, restored);
            report.restored = restored;
            report.status = status;
            if status.is_ok() {
                report.state = BootState::Application;
            }
        }

        report
    }

    /// With anti-rollback, an image without a valid version may not run even if intact.
    async fn check_primary_version(&mut self) -> Result<(), Error> {
        if !self.config.anti_rollback {
            return Ok(());
        }

        match self.version(Slot::PRIMARY).await {
            Ok(version) if version.is_valid() => Ok(()),
            _ => Err(Error::RollbackFailure),
        }
    }

    /// Copy the staged image into its target when it is valid and, with anti-rollback, newer.
    ///
    /// Skipping the copy is not a failure. Returns whether a copy took place.
    async fn promote_staged(&mut self, primary: &mut PrimaryCheck) -> (Result<(), Error>, bool) {
        let staging = self.config.staging;
        if self.verify(staging).await.is_err() {
            return (Err(Error::VerificationFail), false);
        }

        let target = match self.download_target(staging).await {
            Ok(target) => target,
            Err(e) => return (Err(e), false),
        };

        let load = if self.config.anti_rollback {
            let target_check = self.verify(target).await;
            if target == Slot::PRIMARY {
                *primary = Some(target_check);
            }

            if target_check.is_ok() {
                self.rollback_ok(staging).await
            } else {
                // Nothing can be trusted about an invalid target, not even its version.
                self.version(staging).await.is_ok_and(|v| v.is_valid())
            }
        } else {
            true
        };

        if !load {
            log::info!("staged image not newer than slot {:?}", target.0);
            return (Ok(()), false);
        }

        if let Err(e) = self.copy_image(staging, target).await {
            // A partly overwritten target invalidates any earlier check of it.
            if target == Slot::PRIMARY {
                *primary = None;
            }
            return (Err(e), false);
        }

        let check = self.verify(target).await;
        if target == Slot::PRIMARY {
            *primary = Some(check);
        }
        (check, true)
    }

    /// Replace the primary image by the backup image, without a rollback check.
    async fn restore_backup(&mut self, backup: Slot) -> (Result<(), Error>, bool) {
        if self.verify(backup).await.is_err() {
            return (Err(Error::VerificationFail), false);
        }

        if let Err(e) = self.copy_image(backup, Slot::PRIMARY).await {
            return (Err(e), false);
        }

        let mut status = self.verify(Slot::PRIMARY).await;
        if status.is_ok() {
            status = self.check_primary_version().await;
        }
        (status, true)
    }
}
