//! Model loading, classifiers and prediction

pub mod classifier;
pub mod encoder;
pub mod inference;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod standin;

pub use classifier::{ClassLabel, Classifier, InferenceError, LoadedClassifier, ProbabilisticClassifier};
pub use encoder::LabelEncoder;
pub use inference::{Prediction, PredictionSource, Predictor};
pub use loader::{LoadError, ModelBundle, ModelLoader};
pub use standin::StandInScorer;
