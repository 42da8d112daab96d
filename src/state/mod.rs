use serde::{Deserialize, Serialize};

use crate::Error;

/// What the device does after the boot decision.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
    /// Stay in update mode and serve the transport.
    Bootloader,
    /// Jump to the primary image.
    Application,
    /// The transport could not be brought up; nothing else was attempted.
    ErrorState,
}

/// Outcome of the boot decision, set once per boot cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootReport {
    pub state: BootState,

    /// Result of the last phase that ran.
    pub status: Result<(), Error>,

    /// A staged image was copied into its target.
    pub promoted: bool,

    /// The backup image was copied into the primary slot.
    pub restored: bool,
}

impl BootReport {
    /// Upper bound of the encoded size of a report.
    pub const MAX_ENCODED_SIZE: usize = 8;

    pub(crate) const fn new(state: BootState, status: Result<(), Error>) -> Self {
        Self {
            state,
            status,
            promoted: false,
            restored: false,
        }
    }

    /// Encode the report for the host.
    #[cfg(feature = "report")]
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], Error> {
        postcard::to_slice(self, buf).map_err(|_| Error::InvalidArguments)
    }

    #[cfg(feature = "report")]
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        postcard::from_bytes(bytes).map_err(|_| Error::InvalidArguments)
    }
}

#[cfg(all(test, feature = "report"))]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        let report = BootReport {
            state: BootState::Bootloader,
            status: Err(Error::RollbackFailure),
            promoted: true,
            restored: false,
        };

        let mut buf = [0u8; BootReport::MAX_ENCODED_SIZE];
        let encoded = report.encode(&mut buf).unwrap();
        assert_eq!(encoded, &[0, 1, 6, 1, 0]);
        assert_eq!(BootReport::decode(encoded), Ok(report));

        let passed = BootReport::new(BootState::Application, Ok(()));
        let encoded = passed.encode(&mut buf).unwrap();
        assert_eq!(encoded, &[1, 0, 0, 0]);
    }

    #[test]
    fn buffer_too_small() {
        let report = BootReport::new(BootState::ErrorState, Err(Error::Fail));
        let mut buf = [0u8; 2];
        assert_eq!(report.encode(&mut buf), Err(Error::InvalidArguments));
    }
}
