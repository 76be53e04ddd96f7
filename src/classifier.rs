//! Face classification: trusted gallery first, then known intruders.

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;
use crate::error::{GuardError, Result};
use crate::types::{ClassificationResult, Embedding, Frame};

/// Turns a frame into one embedding per detected face.
pub trait FaceEncoder: Send {
    fn encode(&self, frame: &Frame) -> Result<Vec<Embedding>>;
}

pub trait Classifier: Send {
    /// One result per detected face. An empty vec means nobody is visible.
    fn classify(&mut self, frame: &Frame) -> Result<Vec<ClassificationResult>>;

    /// Make a newly registered intruder recognisable on later passes.
    fn remember_intruder(&mut self, _id: &str, _embedding: &Embedding) {}
}

#[derive(Deserialize)]
struct EncodeResponse {
    faces: Vec<EncodedFace>,
}

#[derive(Deserialize)]
struct EncodedFace {
    embedding: Vec<f32>,
}

/// Face encoder running as a local HTTP service.
///
/// `POST {url}/encode` with `{"image": <base64 jpeg>}` answers
/// `{"faces": [{"embedding": [...]}, ...]}`.
pub struct RemoteFaceEncoder {
    agent: ureq::Agent,
    url: String,
}

impl RemoteFaceEncoder {
    pub fn new(base_url: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(5)))
            .build()
            .into();
        Self {
            agent,
            url: format!("{}/encode", base_url.trim_end_matches('/')),
        }
    }

    fn encode_jpeg(&self, jpeg: &[u8]) -> Result<Vec<Embedding>> {
        let body = json!({ "image": STANDARD.encode(jpeg) });
        let response = self
            .agent
            .post(&self.url)
            .send_json(&body)
            .map_err(|e| GuardError::Classification(format!("encoder request failed: {}", e)))?;
        let parsed: EncodeResponse = response
            .into_body()
            .read_json()
            .map_err(|e| GuardError::Classification(format!("encoder response: {}", e)))?;
        Ok(parsed.faces.into_iter().map(|f| Embedding(f.embedding)).collect())
    }
}

impl FaceEncoder for RemoteFaceEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<Embedding>> {
        let jpeg = frame.to_jpeg()?;
        self.encode_jpeg(&jpeg)
    }
}

/// Person name from a gallery file name: `Asha_sample_3.jpg` and `Asha_2.jpg`
/// both give `Asha`; `Asha.jpg` gives `Asha`.
pub fn name_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = match stem.find("_sample_") {
        Some(idx) => &stem[..idx],
        None => match stem.rsplit_once('_') {
            Some((head, tail)) if tail.chars().all(|c| c.is_ascii_digit()) && !tail.is_empty() => head,
            _ => stem,
        },
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Encode every image in `dir`. Unreadable images, encoder failures and
/// images with no face are skipped with a warning; a missing directory yields an empty gallery.
pub fn load_trusted_gallery(dir: &Path, encoder: &dyn FaceEncoder) -> Result<Vec<(String, Embedding)>> {
    if !dir.exists() {
        warn!(dir = %dir.display(), "trusted faces directory missing, everyone is unknown");
        return Ok(Vec::new());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
                Some("jpg" | "jpeg" | "png")
            )
        })
        .collect();
    entries.sort();

    let mut gallery = Vec::new();
    for path in entries {
        let Some(name) = name_from_filename(&path) else {
            continue;
        };
        let frame = match image::open(&path) {
            Ok(img) => Frame::new(img.to_rgb8()),
            Err(e) => {
                warn!(path = %path.display(), "skipping unreadable gallery image: {}", e);
                continue;
            }
        };
        let faces = match encoder.encode(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                warn!(path = %path.display(), "skipping gallery image: {}", e);
                continue;
            }
        };
        match faces.into_iter().next() {
            Some(embedding) => {
                debug!(name = %name, path = %path.display(), "gallery sample");
                gallery.push((name, embedding));
            }
            None => warn!(path = %path.display(), "no face in gallery image"),
        }
    }

    let mut people: Vec<&str> = gallery.iter().map(|(n, _)| n.as_str()).collect();
    people.dedup();
    info!(samples = gallery.len(), people = ?people, "trusted gallery loaded");
    Ok(gallery)
}

/// Nearest-neighbour matcher over the trusted gallery and known intruders.
pub struct GalleryClassifier {
    encoder: Box<dyn FaceEncoder>,
    trusted: Vec<(String, Embedding)>,
    intruders: Vec<(String, Embedding)>,
    tolerance: f32,
    min_confidence: f32,
}

impl GalleryClassifier {
    pub fn new(
        encoder: Box<dyn FaceEncoder>,
        trusted: Vec<(String, Embedding)>,
        intruders: Vec<(String, Embedding)>,
        config: &RecognitionConfig,
    ) -> Self {
        Self {
            encoder,
            trusted,
            intruders,
            tolerance: config.tolerance,
            min_confidence: config.min_confidence,
        }
    }

    /// Closest accepted match in `gallery`, with its confidence.
    fn best_match<'a>(&self, gallery: &'a [(String, Embedding)], face: &Embedding) -> Option<(&'a str, f32)> {
        let (label, distance) = gallery
            .iter()
            .map(|(label, e)| (label.as_str(), face.distance(e)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        let confidence = 1.0 - distance;
        if distance < self.tolerance && confidence >= self.min_confidence {
            Some((label, confidence))
        } else {
            None
        }
    }

    pub fn classify_embedding(&self, face: Embedding) -> ClassificationResult {
        if let Some((name, confidence)) = self.best_match(&self.trusted, &face) {
            return ClassificationResult::trusted(name, confidence, face);
        }
        if let Some((id, confidence)) = self.best_match(&self.intruders, &face) {
            return ClassificationResult::repeat_intruder(id, confidence, face);
        }
        ClassificationResult::unknown(face)
    }
}

impl Classifier for GalleryClassifier {
    fn classify(&mut self, frame: &Frame) -> Result<Vec<ClassificationResult>> {
        let faces = self.encoder.encode(frame)?;
        Ok(faces.into_iter().map(|f| self.classify_embedding(f)).collect())
    }

    fn remember_intruder(&mut self, id: &str, embedding: &Embedding) {
        self.intruders.push((id.to_string(), embedding.clone()));
    }
}
