//! Mask utilities for inpainting edits
//!
//! Two concerns: deriving a short mask prompt from a free-form edit
//! instruction, and inverting segmentation masks. Grounded SAM paints
//! the selected object white; Nova Canvas expects the editable region
//! black, so masks are inverted before inpainting.

use crate::errors::{AppError, Result};
use image::ImageFormat;
use regex_lite::Regex;
use std::io::Cursor;
use std::sync::OnceLock;

struct MaskPatterns {
    verbs: Vec<Regex>,
    object: Regex,
}

fn patterns() -> &'static MaskPatterns {
    static PATTERNS: OnceLock<MaskPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| MaskPatterns {
        verbs: vec![
            Regex::new(r"(?i)\bremove\s+(?:the\s+)?([\w\s]+?)(?:\s+from|\s+in|$)").unwrap(),
            Regex::new(r"(?i)\bdelete\s+(?:the\s+)?([\w\s]+?)(?:\s+from|\s+in|$)").unwrap(),
            Regex::new(r"(?i)\bchange\s+(?:the\s+)?([\w\s]+?)(?:\s+to|\s+into|$)").unwrap(),
            Regex::new(r"(?i)\breplace\s+(?:the\s+)?([\w\s]+?)(?:\s+with|$)").unwrap(),
            Regex::new(r"(?i)\badd\s+[\w\s]+?\s+to\s+(?:the\s+)?([\w\s]+?)$").unwrap(),
            Regex::new(r"(?i)\bmake\s+(?:the\s+)?([\w\s]+?)\s+(?:look|appear|turn)").unwrap(),
        ],
        object: Regex::new(
            r"(?i)\b(person|people|man|woman|child|face|hair|sky|background|car|tree|building|dog|cat|shirt|dress|hat|glasses|table|chair|wall|floor|water|cloud|mountain)\b",
        )
        .unwrap(),
    })
}

/// Derive a mask prompt from an edit instruction. Tries edit verbs
/// first, then common object nouns, then falls back to the first few
/// words of the instruction.
pub fn extract_mask_prompt(instruction: &str) -> String {
    let patterns = patterns();

    for verb in &patterns.verbs {
        if let Some(captures) = verb.captures(instruction) {
            if let Some(target) = captures.get(1) {
                let target = target.as_str().trim();
                if !target.is_empty() {
                    return target.to_string();
                }
            }
        }
    }

    if let Some(found) = patterns.object.find(instruction) {
        return found.as_str().to_lowercase();
    }

    instruction
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Invert a mask image and re-encode it as PNG
pub fn invert_mask(mask_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut img = image::load_from_memory(mask_bytes).map_err(|e| AppError::Validation {
        message: format!("Invalid mask image: {}", e),
        field: Some("mask".to_string()),
    })?;

    img.invert();

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| AppError::Internal {
            message: format!("Failed to encode inverted mask: {}", e),
        })?;

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_extract_from_edit_verbs() {
        assert_eq!(extract_mask_prompt("remove the dog from the photo"), "dog");
        assert_eq!(extract_mask_prompt("Replace the sky with a sunset"), "sky");
        assert_eq!(extract_mask_prompt("change the red car to blue"), "red car");
        assert_eq!(extract_mask_prompt("delete the trash can"), "trash can");
    }

    #[test]
    fn test_extract_falls_back_to_known_objects() {
        assert_eq!(
            extract_mask_prompt("give the person a friendlier expression"),
            "person"
        );
    }

    #[test]
    fn test_extract_falls_back_to_leading_words() {
        assert_eq!(
            extract_mask_prompt("moody cinematic lighting everywhere"),
            "moody cinematic lighting"
        );
    }

    #[test]
    fn test_invert_mask_flips_pixels() {
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(0, 0, Luma([255]));
        img.put_pixel(1, 1, Luma([0]));

        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let inverted = invert_mask(&png.into_inner()).unwrap();
        let decoded = image::load_from_memory(&inverted).unwrap().to_luma8();
        assert_eq!(decoded.get_pixel(0, 0).0[0], 0);
        assert_eq!(decoded.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn test_invert_rejects_garbage() {
        assert!(invert_mask(b"not an image").is_err());
    }
}
