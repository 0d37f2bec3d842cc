use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-request switches carried by `RequestFrame`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FrameOptions: u32 {
        /// Drop the retained frame and send the whole surface (`!`).
        const FULL_REFRESH = 0x1;
        /// Never classify blocks as `Solid`.
        const NO_SOLIDS = 0x2;
        /// Never classify blocks as `Duplicate`.
        const NO_DUPLICATES = 0x4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_serialize_as_bits() {
        let opts = FrameOptions::FULL_REFRESH | FrameOptions::NO_DUPLICATES;
        assert_eq!(serde_json::to_string(&opts).unwrap(), "5");
        let back: FrameOptions = serde_json::from_str("5").unwrap();
        assert_eq!(back, opts);
    }
}
