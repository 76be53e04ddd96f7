use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One decoded camera frame. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as JPEG, e.g. for shipping to the face encoder.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8((*self.image).clone())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
        Ok(buf)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.image.save(path)?;
        Ok(())
    }
}

/// Face embedding produced by the encoder. Opaque to the guard logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Euclidean distance. Mismatched lengths compare as infinitely far.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Trusted,
    Unknown,
    RepeatIntruder,
}

/// One detected face in one classification pass.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub kind: IdentityKind,
    /// Trusted person's name.
    pub label: Option<String>,
    /// Registry id when `kind == RepeatIntruder`.
    pub intruder_id: Option<String>,
    /// `1 - distance` of the best match, 0.0 for unknown faces.
    pub confidence: f32,
    pub embedding: Embedding,
}

impl ClassificationResult {
    pub fn trusted(name: &str, confidence: f32, embedding: Embedding) -> Self {
        Self {
            kind: IdentityKind::Trusted,
            label: Some(name.to_string()),
            intruder_id: None,
            confidence,
            embedding,
        }
    }

    pub fn unknown(embedding: Embedding) -> Self {
        Self {
            kind: IdentityKind::Unknown,
            label: None,
            intruder_id: None,
            confidence: 0.0,
            embedding,
        }
    }

    pub fn repeat_intruder(id: &str, confidence: f32, embedding: Embedding) -> Self {
        Self {
            kind: IdentityKind::RepeatIntruder,
            label: None,
            intruder_id: Some(id.to_string()),
            confidence,
            embedding,
        }
    }
}

/// Per-pass aggregate fed to the debouncer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub has_trusted: bool,
    pub has_unknown_or_repeat: bool,
}

impl FrameSummary {
    pub fn from_results(results: &[ClassificationResult]) -> Self {
        Self {
            has_trusted: results.iter().any(|r| r.kind == IdentityKind::Trusted),
            has_unknown_or_repeat: results.iter().any(|r| r.kind != IdentityKind::Trusted),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn trusted() -> Self {
        Self {
            has_trusted: true,
            has_unknown_or_repeat: false,
        }
    }

    pub fn unknown() -> Self {
        Self {
            has_trusted: false,
            has_unknown_or_repeat: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_mixed_frame() {
        let results = vec![
            ClassificationResult::unknown(Embedding(vec![0.0; 4])),
            ClassificationResult::trusted("Asha", 0.8, Embedding(vec![1.0; 4])),
        ];
        let summary = FrameSummary::from_results(&results);
        assert!(summary.has_trusted);
        assert!(summary.has_unknown_or_repeat);
        assert_eq!(FrameSummary::from_results(&[]), FrameSummary::empty());
    }

    #[test]
    fn embedding_distance() {
        let a = Embedding(vec![0.0, 0.0]);
        let b = Embedding(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!(a.distance(&Embedding(vec![1.0])).is_infinite());
    }
}
