//! Request-scoped session: two image slots, the active configuration and the
//! results derived from them.
//!
//! Every derived result is tagged with the configuration it was computed
//! under. Changing an image or the configuration eagerly drops the results it
//! invalidates, and accessors never return a result whose tag differs from the
//! current configuration.

use crate::adapters::{self, AttributeResult, ExtractionResult, VerificationResult};
use crate::capability::FaceCapability;
use crate::configuration::AnalysisConfiguration;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// File extensions accepted as uploads.
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageBlobError {
    #[error("unsupported image type '{0}' (expected jpg, jpeg or png)")]
    UnsupportedType(String),
    #[error("image file is empty: {0}")]
    Empty(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Uploaded image: encoded bytes plus a display name.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImageBlob {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read an upload from disk, checking its extension and that it is non-empty.
    pub fn from_path(path: &Path) -> Result<Self, ImageBlobError> {
        let display = path.display().to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ImageBlobError::UnsupportedType(ext));
        }

        let bytes = std::fs::read(path).map_err(|source| ImageBlobError::Io {
            path: display.clone(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(ImageBlobError::Empty(display));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);
        Ok(Self { name, bytes })
    }
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// One of the two image positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::A, Slot::B];

    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    /// User-facing name ("image 1", "image 2").
    pub fn label(self) -> &'static str {
        match self {
            Slot::A => "image 1",
            Slot::B => "image 2",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A result together with the configuration it was computed under.
#[derive(Debug, Clone)]
struct Tagged<T> {
    under: AnalysisConfiguration,
    value: T,
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    blob: Option<ImageBlob>,
    extraction: Option<Tagged<ExtractionResult>>,
    attributes: Option<Tagged<AttributeResult>>,
}

impl SlotState {
    fn invalidate(&mut self) {
        self.extraction = None;
        self.attributes = None;
    }
}

/// Snapshot of one slot for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub slot: Slot,
    pub name: Option<String>,
    pub extraction: Option<ExtractionResult>,
    pub attributes: Option<AttributeResult>,
}

/// Snapshot of the whole session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub configuration: AnalysisConfiguration,
    pub images: Vec<ImageReport>,
    pub verification: Option<VerificationResult>,
}

/// Explicit replacement for ambient UI session state. Owned by the caller and
/// passed through each analysis run.
#[derive(Debug, Clone, Default)]
pub struct Session {
    configuration: AnalysisConfiguration,
    slots: [SlotState; 2],
    verification: Option<Tagged<VerificationResult>>,
}

impl Session {
    pub fn new(configuration: AnalysisConfiguration) -> Self {
        Self {
            configuration,
            ..Self::default()
        }
    }

    pub fn configuration(&self) -> &AnalysisConfiguration {
        &self.configuration
    }

    /// Switch configuration. Any change drops every derived result for both
    /// images; setting the current configuration again keeps them.
    pub fn set_configuration(&mut self, configuration: AnalysisConfiguration) {
        if configuration == self.configuration {
            return;
        }
        tracing::debug!(from = %self.configuration, to = %configuration, "configuration changed, invalidating results");
        self.configuration = configuration;
        for slot in &mut self.slots {
            slot.invalidate();
        }
        self.verification = None;
    }

    /// Replace the image in `slot`, dropping its results and the verification.
    pub fn set_image(&mut self, slot: Slot, blob: ImageBlob) {
        tracing::debug!(%slot, name = %blob.name, bytes = blob.bytes.len(), "image set");
        let state = &mut self.slots[slot.index()];
        state.blob = Some(blob);
        state.invalidate();
        self.verification = None;
    }

    pub fn clear_image(&mut self, slot: Slot) {
        let state = &mut self.slots[slot.index()];
        state.blob = None;
        state.invalidate();
        self.verification = None;
    }

    pub fn image(&self, slot: Slot) -> Option<&ImageBlob> {
        self.slots[slot.index()].blob.as_ref()
    }

    pub fn extraction(&self, slot: Slot) -> Option<&ExtractionResult> {
        self.current(self.slots[slot.index()].extraction.as_ref())
    }

    pub fn attributes(&self, slot: Slot) -> Option<&AttributeResult> {
        self.current(self.slots[slot.index()].attributes.as_ref())
    }

    pub fn verification(&self) -> Option<&VerificationResult> {
        self.current(self.verification.as_ref())
    }

    fn current<'a, T>(&self, tagged: Option<&'a Tagged<T>>) -> Option<&'a T> {
        tagged
            .filter(|t| t.under == self.configuration)
            .map(|t| &t.value)
    }

    /// The analysis trigger: extract each present image, analyse attributes of
    /// each extracted face, then compare the pair.
    ///
    /// Results still valid from an earlier run are reused. One image failing
    /// never stops work on the other.
    pub fn run(&mut self, capability: &mut dyn FaceCapability) -> SessionReport {
        let config = self.configuration;

        for slot in Slot::ALL {
            let state = &mut self.slots[slot.index()];
            let Some(blob) = state.blob.as_ref() else {
                continue;
            };

            if state.extraction.is_none() {
                tracing::debug!(%slot, detector = %config.detector_backend, "extracting face");
                let value = adapters::extract(capability, &blob.bytes, config.detector_backend);
                state.extraction = Some(Tagged { under: config, value });
            }

            let needs_attributes = state.attributes.is_none();
            let face = state
                .extraction
                .as_ref()
                .and_then(|t| t.value.face_bytes.as_deref());
            if let (true, Some(face)) = (needs_attributes, face) {
                tracing::debug!(%slot, "analysing attributes");
                let value = adapters::analyze(capability, face, config.detector_backend);
                state.attributes = Some(Tagged { under: config, value });
            }
        }

        if self.verification.is_none() {
            let value = self.compare(capability);
            self.verification = Some(Tagged { under: config, value });
        }

        self.report()
    }

    fn compare(&self, capability: &mut dyn FaceCapability) -> VerificationResult {
        let config = &self.configuration;

        let missing: Vec<&str> = Slot::ALL
            .iter()
            .filter(|s| self.image(**s).is_none())
            .map(|s| s.label())
            .collect();
        if !missing.is_empty() {
            return VerificationResult::failed(config, format!("upload {} to continue", missing.join(" and ")));
        }

        let faces: Vec<Option<&[u8]>> = Slot::ALL
            .iter()
            .map(|&s| self.extraction(s).and_then(|e| e.face_bytes.as_deref()))
            .collect();

        match (faces[0], faces[1]) {
            (Some(a), Some(b)) => adapters::verify(capability, a, b, config),
            _ => {
                let failed: Vec<&str> = Slot::ALL
                    .iter()
                    .zip(&faces)
                    .filter(|(_, f)| f.is_none())
                    .map(|(s, _)| s.label())
                    .collect();
                VerificationResult::failed(config, format!("no face extracted from {}", failed.join(" and ")))
            }
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            configuration: self.configuration,
            images: Slot::ALL
                .iter()
                .map(|&slot| ImageReport {
                    slot,
                    name: self.image(slot).map(|b| b.name.clone()),
                    extraction: self.extraction(slot).cloned(),
                    attributes: self.attributes(slot).cloned(),
                })
                .collect(),
            verification: self.verification().cloned(),
        }
    }
}
