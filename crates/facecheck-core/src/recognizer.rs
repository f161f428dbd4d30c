//! Face recognizer via ONNX Runtime.
//!
//! One session per embedding model. Each model declares its input geometry,
//! tensor layout and pixel normalisation in a [`ModelSpec`].

use crate::configuration::ModelName;
use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Input tensor memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Pixel normalisation applied before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// `p / 255`
    Unit,
    /// `(p - 127.5) / 127.5`
    Symmetric,
    /// Per-image zero mean, unit variance.
    Standardize,
    /// Raw 0..255 values.
    Raw,
}

/// Static description of a recognition model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub file_name: &'static str,
    pub input_height: u32,
    pub input_width: u32,
    pub embedding_dim: usize,
    pub layout: TensorLayout,
    pub normalization: Normalization,
}

pub fn model_spec(model: ModelName) -> ModelSpec {
    use Normalization::*;
    use TensorLayout::*;

    let spec = |file_name, input_height, input_width, embedding_dim, layout, normalization| ModelSpec {
        file_name,
        input_height,
        input_width,
        embedding_dim,
        layout,
        normalization,
    };

    match model {
        ModelName::VggFace => spec("vgg_face.onnx", 224, 224, 4096, Nhwc, Unit),
        ModelName::Facenet => spec("facenet128.onnx", 160, 160, 128, Nhwc, Standardize),
        ModelName::Facenet512 => spec("facenet512.onnx", 160, 160, 512, Nhwc, Standardize),
        ModelName::OpenFace => spec("openface.onnx", 96, 96, 128, Nhwc, Unit),
        ModelName::DeepFace => spec("deepface.onnx", 152, 152, 4096, Nhwc, Unit),
        ModelName::DeepID => spec("deepid.onnx", 55, 47, 160, Nhwc, Unit),
        ModelName::ArcFace => spec("arcface.onnx", 112, 112, 512, Nchw, Symmetric),
        ModelName::Dlib => spec("dlib_resnet.onnx", 150, 150, 128, Nhwc, Raw),
        ModelName::SFace => spec("sface.onnx", 112, 112, 128, Nchw, Raw),
    }
}

/// Embedding extractor for one recognition model.
pub struct FaceRecognizer {
    session: Session,
    model: ModelName,
    spec: ModelSpec,
}

impl FaceRecognizer {
    /// Load the ONNX model for `model` from `model_dir`.
    pub fn load(model_dir: &Path, model: ModelName, intra_threads: usize) -> Result<Self, RecognizerError> {
        let spec = model_spec(model);
        let model_path = model_dir.join(spec.file_name);
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            model = %model,
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, model, spec })
    }

    /// Extract an embedding from a face crop. The crop is resized to the model's
    /// input size; it should already be cropped (and ideally aligned).
    pub fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess(face, &self.spec);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.spec.embedding_dim {
            return Err(RecognizerError::InferenceFailed(format!(
                "{}: expected {}-dim embedding, got {}",
                self.model,
                self.spec.embedding_dim,
                raw.len()
            )));
        }

        Ok(Embedding {
            values: raw.to_vec(),
            model: Some(self.model.to_string()),
        })
    }
}

/// Resize a face crop to the model input and build the input tensor.
pub(crate) fn preprocess(face: &RgbImage, spec: &ModelSpec) -> Array4<f32> {
    let (h, w) = (spec.input_height as usize, spec.input_width as usize);
    let resized = image::imageops::resize(face, spec.input_width, spec.input_height, FilterType::Triangle);

    let (mean, std) = match spec.normalization {
        Normalization::Unit => (0.0, 255.0),
        Normalization::Symmetric => (127.5, 127.5),
        Normalization::Raw => (0.0, 1.0),
        Normalization::Standardize => {
            let n = resized.as_raw().len().max(1) as f32;
            let mean = resized.as_raw().iter().map(|&p| p as f32).sum::<f32>() / n;
            let var = resized
                .as_raw()
                .iter()
                .map(|&p| (p as f32 - mean).powi(2))
                .sum::<f32>()
                / n;
            // Floor the deviation so flat images do not divide by zero.
            (mean, var.sqrt().max(1.0 / n.sqrt()))
        }
    };

    let mut tensor = match spec.layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (pixel[c] as f32 - mean) / std;
            match spec.layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
            }
        }
    }

    tensor
}
