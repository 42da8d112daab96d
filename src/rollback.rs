//! Anti-rollback version ordering.

use crate::{Bootloader, FlashDevice, Slot, footer::Version, log};

impl Version {
    /// Whether an image carrying `self` may replace one carrying `installed`.
    ///
    /// An installed image without a valid version can always be replaced by one that has a
    /// valid version. An image without a valid version never replaces anything.
    pub const fn supersedes(self, installed: Version) -> bool {
        match (self.is_valid(), installed.is_valid()) {
            (true, true) => self.0 > installed.0,
            (true, false) => true,
            (false, _) => false,
        }
    }
}

impl<D: FlashDevice, const PAGE: usize> Bootloader<D, PAGE> {
    /// Whether the image in `slot` may be installed over its download target.
    ///
    /// An image targeting its own slot, an unconfigured slot or an unreadable footer is never
    /// allowed.
    pub async fn rollback_ok(&mut self, slot: Slot) -> bool {
        let Ok(candidate) = self.read_footer(slot).await else {
            return false;
        };

        let target = candidate.download_target();
        if target == slot || !self.config.contains(target) {
            log::warn!("slot {:?} targets invalid slot {:?}", slot.0, target.0);
            return false;
        }

        let Ok(installed) = self.version(target).await else {
            return false;
        };

        let allowed = candidate.version.supersedes(installed);
        log::debug!(
            "version {:#x} over {:#x}: allowed {:?}",
            candidate.version.0,
            installed.0,
            allowed
        );
        allowed
    }
}
