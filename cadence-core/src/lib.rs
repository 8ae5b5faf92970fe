//! cadence-core - Behavioral feature engineering for adaptive quizzes
//!
//! Turns a learner's quiz telemetry into a feature vector, a Cognitive
//! Stability Index, a behavioral fingerprint, an energy curve and gamification
//! bookkeeping. Classification itself is delegated to an external model
//! behind the [`Classifier`] trait; results are written through the
//! [`ProfileStore`] trait.

pub mod classifier;
pub mod config;
pub mod energy;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod gamification;
pub mod insights;
pub mod mode;
pub mod numeric;
pub mod pipeline;
pub mod stability;
pub mod store;
pub mod types;

pub use classifier::{
    Classification, Classifier, ClassifierError, ClassifierPayload, GatewayClassifier,
    Prediction, StaticClassifier, UpcomingQuestion,
};
pub use config::CadenceConfig;
pub use energy::{EnergyAnalyzer, EnergyProfile, EnergyReport};
pub use error::{CadenceError, Result};
pub use features::{FeatureExtractor, FeatureVector};
pub use fingerprint::{BehavioralFingerprint, FingerprintBuilder, FingerprintSignals};
pub use gamification::{Badge, CompletionOutcome, GamificationLedger, GamificationState, QuizCompletion};
pub use mode::{CognitiveMode, ModeTracker, RealtimeModeDetector};
pub use pipeline::{
    AnalysisOutcome, AnalysisReport, AnalysisWindow, CognitivePipeline, LocalAnalysis,
    LocalAnalyzer,
};
pub use stability::{StabilityReport, StabilityScorer};
pub use store::{AttemptSource, InMemoryStore, ProfileStore, Versioned};
pub use types::*;
