use crate::error::{SegmaskError, SegmaskResult};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const MASK_BLUR_RANGE: RangeInclusive<i32> = 0..=10;
pub const MASK_OFFSET_RANGE: RangeInclusive<i32> = -10..=10;

/// Mask parameters applied to every file of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessingParameters {
    /// Blur radius in pixels.
    pub mask_blur: i32,
    /// Offset in pixels; negative values shrink the mask.
    pub mask_offset: i32,
    pub invert_output: bool,
}

impl ProcessingParameters {
    pub fn new(mask_blur: i32, mask_offset: i32, invert_output: bool) -> SegmaskResult<Self> {
        let params = Self { mask_blur, mask_offset, invert_output };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> SegmaskResult<()> {
        if !MASK_BLUR_RANGE.contains(&self.mask_blur) {
            return Err(SegmaskError::validation(format!(
                "mask_blur must be between {} and {}, got {}",
                MASK_BLUR_RANGE.start(),
                MASK_BLUR_RANGE.end(),
                self.mask_blur
            )));
        }
        if !MASK_OFFSET_RANGE.contains(&self.mask_offset) {
            return Err(SegmaskError::validation(format!(
                "mask_offset must be between {} and {}, got {}",
                MASK_OFFSET_RANGE.start(),
                MASK_OFFSET_RANGE.end(),
                self.mask_offset
            )));
        }
        Ok(())
    }

    /// Multipart text fields in the form the remote API expects.
    pub fn form_fields(&self) -> [(&'static str, String); 3] {
        [
            ("mask_blur", self.mask_blur.to_string()),
            ("mask_offset", self.mask_offset.to_string()),
            ("invert_output", self.invert_output.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ProcessingParameters::default().validate().is_ok());
    }

    #[test]
    fn test_range_limits() {
        assert!(ProcessingParameters::new(10, -10, true).is_ok());
        assert!(ProcessingParameters::new(11, 0, false).is_err());
        assert!(ProcessingParameters::new(-1, 0, false).is_err());
        assert!(ProcessingParameters::new(0, 11, false).is_err());
        assert!(ProcessingParameters::new(0, -11, false).is_err());
    }

    #[test]
    fn test_form_fields_are_stringified() {
        let params = ProcessingParameters::new(3, -2, true).unwrap();
        let fields = params.form_fields();
        assert_eq!(fields[0], ("mask_blur", "3".to_string()));
        assert_eq!(fields[1], ("mask_offset", "-2".to_string()));
        assert_eq!(fields[2], ("invert_output", "true".to_string()));
    }
}
