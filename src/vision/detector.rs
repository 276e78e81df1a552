//! Recognition types shared by all strategies
//!
//! Every strategy turns a cropped region into a [`Recognition`]. Numbers are
//! carried as [`RouletteNumber`], which can only hold values on the wheel, so a
//! result outside 0..=36 cannot reach the validator.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest number on a single-zero wheel
pub const MAX_NUMBER: u8 = 36;

/// Red pockets of a single-zero wheel
const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

/// Pocket color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouletteColor {
    Red,
    Black,
    Green,
}

impl RouletteColor {
    /// All colors, in classification order
    pub const ALL: [RouletteColor; 3] = [RouletteColor::Red, RouletteColor::Black, RouletteColor::Green];
}

impl fmt::Display for RouletteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouletteColor::Red => write!(f, "red"),
            RouletteColor::Black => write!(f, "black"),
            RouletteColor::Green => write!(f, "green"),
        }
    }
}

impl FromStr for RouletteColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" => Ok(RouletteColor::Red),
            "black" => Ok(RouletteColor::Black),
            "green" => Ok(RouletteColor::Green),
            _ => Err(format!("Unknown color: {}", s)),
        }
    }
}

/// A number that exists on the wheel (0..=36)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RouletteNumber(u8);

impl RouletteNumber {
    /// Returns `None` for values off the wheel
    pub fn new(value: u8) -> Option<Self> {
        (value <= MAX_NUMBER).then_some(Self(value))
    }

    /// Parse a number from recognized text, ignoring surrounding whitespace
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.len() > 2 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        trimmed.parse::<u8>().ok().and_then(Self::new)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Pocket color of this number
    pub fn color(self) -> RouletteColor {
        if self.0 == 0 {
            RouletteColor::Green
        } else if RED_NUMBERS.contains(&self.0) {
            RouletteColor::Red
        } else {
            RouletteColor::Black
        }
    }
}

impl TryFrom<u8> for RouletteNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("{} is not on the wheel", value))
    }
}

impl From<RouletteNumber> for u8 {
    fn from(number: RouletteNumber) -> u8 {
        number.0
    }
}

impl fmt::Display for RouletteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strategy that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionMethod {
    Template,
    Ocr,
    Color,
}

impl fmt::Display for RecognitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMethod::Template => write!(f, "template"),
            RecognitionMethod::Ocr => write!(f, "ocr"),
            RecognitionMethod::Color => write!(f, "color"),
        }
    }
}

/// A scored guess from a single strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub number: RouletteNumber,
    pub score: f32,
    pub method: RecognitionMethod,
}

impl Candidate {
    pub fn new(number: RouletteNumber, score: f32, method: RecognitionMethod) -> Self {
        Self { number, score, method }
    }
}

/// Dedup key: the pair that identifies a displayed result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultSignature {
    pub number: RouletteNumber,
    pub color: RouletteColor,
}

impl fmt::Display for ResultSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.color)
    }
}

/// Output of the arbiter for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub number: Option<RouletteNumber>,
    pub color: Option<RouletteColor>,
    /// Confidence level (0.0 - 1.0)
    pub confidence: f32,
    pub method: RecognitionMethod,
    pub is_zero: bool,
}

impl RecognitionResult {
    /// Result carrying a number; color and zero flag follow from the wheel
    pub fn from_number(number: RouletteNumber, confidence: f32, method: RecognitionMethod) -> Self {
        Self {
            number: Some(number),
            color: Some(number.color()),
            confidence: confidence.clamp(0.0, 1.0),
            method,
            is_zero: number.is_zero(),
        }
    }

    /// Color-only result from the color classifier
    pub fn color_only(color: RouletteColor, confidence: f32) -> Self {
        Self {
            number: None,
            color: Some(color),
            confidence: confidence.clamp(0.0, 1.0),
            method: RecognitionMethod::Color,
            is_zero: false,
        }
    }

    /// Dedup key, if both halves are known
    pub fn signature(&self) -> Option<ResultSignature> {
        Some(ResultSignature {
            number: self.number?,
            color: self.color?,
        })
    }
}

/// What a single strategy concluded about a region
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// The strategy's own acceptance rule passed
    Accepted(RecognitionResult),
    /// Near-tie between two candidates below the acceptance bar
    Ambiguous { best: Candidate, runner_up: Candidate },
    /// Nothing usable
    NoMatch,
}

impl Recognition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Recognition::Accepted(_))
    }
}

/// A recognition strategy over a cropped region.
///
/// Strategies report "no candidate" through [`Recognition::NoMatch`] rather
/// than errors so the arbiter can fall through to the next one.
pub trait CandidateRecognizer: Send {
    /// Method tag used for results of this strategy
    fn method(&self) -> RecognitionMethod;

    /// Recognize the number display in `roi`
    fn recognize(&self, roi: &RgbImage) -> Recognition;
}
