use crate::envelope::SingletonDescriptor;

/// What a presence record claims about one version of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicationDetails {
    /// Hash, size and signature of the envelope at `version`
    Signed {
        version: u32,
        hash: Vec<u8>,
        size: u32,
        sig: Vec<u8>,
    },
    /// Keyless subscriptions publish their descriptor instead
    Singleton {
        version: u32,
        descriptor: SingletonDescriptor,
    },
}

impl PublicationDetails {
    pub fn version(&self) -> u32 {
        match self {
            PublicationDetails::Signed { version, .. } => *version,
            PublicationDetails::Singleton { version, .. } => *version,
        }
    }
}

/// Result of the last signature check, keyed by the exact record checked
#[derive(Debug, Clone, Default)]
pub(crate) struct VerifyCache {
    last: Option<(PublicationDetails, bool)>,
}

impl VerifyCache {
    pub(crate) fn get(&self, details: &PublicationDetails) -> Option<bool> {
        match &self.last {
            Some((cached, result)) if cached == details => Some(*result),
            _ => None,
        }
    }

    pub(crate) fn put(&mut self, details: PublicationDetails, result: bool) {
        self.last = Some((details, result));
    }
}
