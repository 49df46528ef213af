//! Ensemble sentiment model
//!
//! Two base models vote: the primary model sees the text with HTML tags
//! stripped, the classical model sees a normalized form (lowercase, no
//! digits, punctuation folded to spaces). A [`MetaModel`] turns the two class
//! codes into the final [`SentimentClass`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use sentiq_common::text::strip_tags;

use super::lexicon::LexiconModel;
use super::{labels, SentimentModel};
use crate::error::ModelError;

/// File name of the classical model inside `models.cache_dir`
pub const CLASSIC_MODEL_FILE: &str = "classic.toml";

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Final sentiment class of the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentimentClass {
    Negative,
    Positive,
    Neutral,
}

impl SentimentClass {
    /// Numeric code used by the meta model (NEGATIVE 2, POSITIVE 1, NEUTRAL 0)
    pub fn code(self) -> i8 {
        match self {
            SentimentClass::Negative => 2,
            SentimentClass::Positive => 1,
            SentimentClass::Neutral => 0,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            2 => Some(SentimentClass::Negative),
            1 => Some(SentimentClass::Positive),
            0 => Some(SentimentClass::Neutral),
            _ => None,
        }
    }

    /// Reply letter: B (bad), G (good), N (neutral)
    pub fn letter(self) -> &'static str {
        match self {
            SentimentClass::Negative => "B",
            SentimentClass::Positive => "G",
            SentimentClass::Neutral => "N",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            labels::NEGATIVE => Some(SentimentClass::Negative),
            labels::POSITIVE => Some(SentimentClass::Positive),
            labels::NEUTRAL => Some(SentimentClass::Neutral),
            _ => None,
        }
    }
}

/// Code for a model label; -1 when the label is not one of the three classes
pub fn label_code(label: &str) -> i8 {
    SentimentClass::from_label(label).map_or(-1, SentimentClass::code)
}

/// Combines base-model codes into a final class
pub trait MetaModel: Send + Sync {
    fn combine(&self, primary: i8, classic: i8) -> SentimentClass;
}

/// Agreement rule
///
/// Agreeing models win outright. A neutral or unknown primary vote defers to
/// the classical model; otherwise the primary vote stands. Two unknown votes
/// are neutral.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgreementMeta;

impl MetaModel for AgreementMeta {
    fn combine(&self, primary: i8, classic: i8) -> SentimentClass {
        let primary = SentimentClass::from_code(primary);
        let classic = SentimentClass::from_code(classic);
        match (primary, classic) {
            (Some(p), Some(c)) if p == c => p,
            (None | Some(SentimentClass::Neutral), Some(c)) => c,
            (Some(p), _) => p,
            (None, None) => SentimentClass::Neutral,
        }
    }
}

/// Lowercase, drop digits, fold non-word runs to single spaces
pub fn normalize_for_classic(text: &str) -> String {
    let lowered = text.to_lowercase();
    let no_digits = DIGITS.replace_all(&lowered, "");
    let words = NON_WORD.replace_all(&no_digits, " ");
    WHITESPACE.replace_all(&words, " ").trim().to_string()
}

/// Primary + classical + meta model
pub struct EnsembleModel {
    primary: Arc<dyn SentimentModel>,
    classic: Arc<dyn SentimentModel>,
    meta: Box<dyn MetaModel>,
}

impl EnsembleModel {
    pub fn new(
        primary: Arc<dyn SentimentModel>,
        classic: Arc<dyn SentimentModel>,
        meta: Box<dyn MetaModel>,
    ) -> Self {
        Self { primary, classic, meta }
    }

    /// Base-model codes for one text, primary first
    pub fn votes(&self, text: &str) -> Result<(i8, i8), ModelError> {
        let primary = self.primary.predict(strip_tags(text).trim())?;
        let classic = self.classic.predict(&normalize_for_classic(text))?;
        debug!(primary = %primary.label, classic = %classic.label, "Ensemble votes");
        Ok((label_code(&primary.label), label_code(&classic.label)))
    }

    pub fn predict(&self, text: &str) -> Result<SentimentClass, ModelError> {
        let (primary, classic) = self.votes(text)?;
        Ok(self.meta.combine(primary, classic))
    }

    pub fn predict_batch(&self, texts: &[String]) -> Result<Vec<SentimentClass>, ModelError> {
        texts.iter().map(|text| self.predict(text)).collect()
    }
}

/// Builds the ensemble around an already resolved primary model
pub trait EnsembleLoader: Send + Sync {
    fn load(
        &self,
        cache_dir: &Path,
        primary: Arc<dyn SentimentModel>,
    ) -> Result<EnsembleModel, ModelError>;
}

/// Reads the classical model as a lexicon from `<cache_dir>/classic.toml`
///
/// The ensemble is unavailable until that file exists.
#[derive(Debug, Clone, Default)]
pub struct LexiconEnsembleLoader;

impl LexiconEnsembleLoader {
    pub fn classic_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(CLASSIC_MODEL_FILE)
    }
}

impl EnsembleLoader for LexiconEnsembleLoader {
    fn load(
        &self,
        cache_dir: &Path,
        primary: Arc<dyn SentimentModel>,
    ) -> Result<EnsembleModel, ModelError> {
        let path = Self::classic_path(cache_dir);
        let classic = LexiconModel::from_file(&path)?;
        info!("Loaded ensemble classical model from {}", path.display());
        Ok(EnsembleModel::new(primary, Arc::new(classic), Box::new(AgreementMeta)))
    }
}
