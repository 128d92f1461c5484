pub mod classifier;
pub mod corpus;
pub mod matcher;
pub mod ocr;
pub mod roi;

pub use classifier::{ClassifierConfig, OutcomeClassifier};
pub use corpus::{Insert, TemplateCorpus, CORPUS_CAP};
pub use ocr::{TesseractCli, TextRecognizer};
pub use roi::{HighlightBand, Rect, RoiLocator};
