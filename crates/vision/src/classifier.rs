use std::path::Path;

use image::{imageops, GrayImage, RgbImage};
use tracing::{debug, info, warn};

use common::{Outcome, OutcomeDetector};

use crate::corpus::{TemplateCorpus, CORPUS_CAP};
use crate::matcher::{best_match, downscale_pair, MATCH_THRESHOLD};
use crate::ocr::{has_loss_token, has_win_token, TextRecognizer};
use crate::roi::{HighlightBand, RoiLocator};

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub band: HighlightBand,
    pub padding: u32,
    pub min_region_area: usize,
    pub match_threshold: f32,
    /// ROIs larger than this are downscaled before template matching.
    pub max_match_pixels: u64,
    pub corpus_cap: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            band: HighlightBand::default(),
            padding: 10,
            min_region_area: 20,
            match_threshold: MATCH_THRESHOLD,
            max_match_pixels: 160_000,
            corpus_cap: CORPUS_CAP,
        }
    }
}

/// Per-frame outcome detection with a self-growing template library.
///
/// Each frame is cropped to its highlight ROI, matched against the stored
/// templates of every class, and read with OCR. Template and OCR evidence are
/// fused with WIN checked first. Whenever OCR recognised the returned class,
/// the ROI is added to that class's corpus so later frames can be matched
/// without OCR.
///
/// Backend failures are contained per stage: a broken corpus counts as "no
/// template hit" and a failed OCR call as "no tokens".
pub struct OutcomeClassifier {
    locator: RoiLocator,
    win: TemplateCorpus,
    loss: TemplateCorpus,
    ocr: Box<dyn TextRecognizer>,
    threshold: f32,
    max_match_pixels: u64,
}

impl OutcomeClassifier {
    /// Templates live in `<template_root>/win` and `<template_root>/loss`.
    pub fn new(
        template_root: impl AsRef<Path>,
        ocr: Box<dyn TextRecognizer>,
        config: ClassifierConfig,
    ) -> Self {
        let root = template_root.as_ref();
        Self {
            locator: RoiLocator::new(config.band, config.padding, config.min_region_area),
            win: TemplateCorpus::new(root.join(Outcome::Win.label()), config.corpus_cap),
            loss: TemplateCorpus::new(root.join(Outcome::Loss.label()), config.corpus_cap),
            ocr,
            threshold: config.match_threshold,
            max_match_pixels: config.max_match_pixels,
        }
    }

    pub fn corpus(&self, outcome: Outcome) -> &TemplateCorpus {
        match outcome {
            Outcome::Win => &self.win,
            Outcome::Loss => &self.loss,
        }
    }

    pub fn classify(&self, frame: &RgbImage) -> Option<Outcome> {
        let rect = self.locator.locate(frame);
        if rect.is_empty() {
            return None;
        }
        let roi = rect.crop(frame);
        let roi_gray = imageops::grayscale(&roi);

        let template_win = self.template_hit(Outcome::Win, &roi_gray);
        let template_loss = self.template_hit(Outcome::Loss, &roi_gray);

        let tokens = match self.ocr.recognize(&roi) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "OCR failed, relying on templates only");
                Vec::new()
            }
        };
        let ocr_win = has_win_token(&tokens);
        let ocr_loss = has_loss_token(&tokens);

        let outcome = if template_win || ocr_win {
            Outcome::Win
        } else if template_loss || ocr_loss {
            Outcome::Loss
        } else {
            debug!("No outcome evidence in frame");
            return None;
        };

        let learned_from_ocr = match outcome {
            Outcome::Win => ocr_win,
            Outcome::Loss => ocr_loss,
        };
        if learned_from_ocr {
            self.learn(outcome, &roi);
        }

        info!(
            outcome = %outcome,
            template_win,
            template_loss,
            ocr_win,
            ocr_loss,
            "Outcome detected"
        );
        Some(outcome)
    }

    /// Templates are re-read every call so concurrently learned ones are used.
    fn template_hit(&self, outcome: Outcome, roi: &GrayImage) -> bool {
        let templates = match self.corpus(outcome).load() {
            Ok(templates) => templates,
            Err(e) => {
                warn!(class = outcome.label(), error = %e, "Template corpus unreadable");
                return false;
            }
        };

        templates.iter().any(|template| {
            let (haystack, needle) = downscale_pair(roi, template, self.max_match_pixels);
            match best_match(&haystack, &needle) {
                Some(score) if score >= self.threshold => {
                    debug!(class = outcome.label(), score, "Template matched");
                    true
                }
                _ => false,
            }
        })
    }

    fn learn(&self, outcome: Outcome, roi: &RgbImage) {
        if let Err(e) = self.corpus(outcome).insert(roi) {
            warn!(class = outcome.label(), error = %e, "Failed to save template");
        }
    }
}

impl OutcomeDetector for OutcomeClassifier {
    fn detect(&self, frame: &RgbImage) -> Option<Outcome> {
        self.classify(frame)
    }
}
