pub mod bitfinex;
pub mod llm_classifier;
pub mod notifier;
pub mod paper;
pub mod postgres;
pub mod truth_social;

pub use bitfinex::BitfinexClient;
pub use llm_classifier::LlmClassifier;
pub use notifier::{build_notifier, LogNotifier, TwilioNotifier};
pub use paper::PaperExecutor;
pub use postgres::PostgresCursorStore;
pub use truth_social::TruthSocialSource;
