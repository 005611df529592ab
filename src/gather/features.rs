use super::protocol::ProtocolError;
use std::fmt;

/// Capabilities a client may announce, by bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Feature {
    SendsizeReqOptions = 5,
    ReqOptionsMaxdumps = 33,
    ReqOptionsHostname = 34,
    ReqOptionsFeatures = 35,
    CalcsizeEstimate = 52,
    ReqOptionsConfig = 77,
}

impl Feature {
    /// Everything this planner can make use of.
    pub(crate) const SUPPORTED: [Self; 6] = [
        Self::SendsizeReqOptions,
        Self::ReqOptionsMaxdumps,
        Self::ReqOptionsHostname,
        Self::ReqOptionsFeatures,
        Self::CalcsizeEstimate,
        Self::ReqOptionsConfig,
    ];

    const fn bit(self) -> usize {
        self as usize
    }
}

/// Bit set of client capabilities, exchanged as a hex string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FeatureSet {
    bytes: Vec<u8>,
}

impl FeatureSet {
    /// What an old client that cannot announce anything gets.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn ours() -> Self {
        let mut set = Self::empty();
        for feature in Feature::SUPPORTED {
            set.set(feature);
        }
        set
    }

    pub(crate) fn set(&mut self, feature: Feature) {
        let bit = feature.bit();
        if self.bytes.len() <= bit / 8 {
            self.bytes.resize(bit / 8 + 1, 0);
        }
        self.bytes[bit / 8] |= 1 << (bit % 8);
    }

    pub(crate) fn has(&self, feature: Feature) -> bool {
        let bit = feature.bit();
        self.bytes.get(bit / 8).is_some_and(|b| b & (1 << (bit % 8)) != 0)
    }

    pub(crate) fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a hex feature string. A trailing odd digit is ignored.
    pub(crate) fn from_hex(hex: &str) -> Result<Self, ProtocolError> {
        let digits = hex.as_bytes();
        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in digits.chunks_exact(2) {
            let byte = std::str::from_utf8(pair)
                .ok()
                .filter(|p| p.bytes().all(|c| c.is_ascii_hexdigit()))
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .ok_or_else(|| ProtocolError::BadFeatures(hex.to_string()))?;
            bytes.push(byte);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
