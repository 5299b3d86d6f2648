//! Lifestyle advisory generation for cardio risk predictions.
//!
//! Advisory text comes from an external chat-completion API and is treated as
//! a collaborator behind a narrow interface:
//!
//! - [`AdvisoryGenerator`] — `generate_advisory(observation, prediction, profile) -> text`
//! - [`LlmAdvisor`] — Implementation backed by an OpenAI-compatible endpoint
//! - [`AdvisoryProfile`] — Optional caller context folded into the request
//!
//! ```rust,ignore
//! use cardio_llm::{AdvisoryGenerator, AdvisoryProfile, LlmAdvisor};
//!
//! let advisor = LlmAdvisor::new("gpt-4o-mini", None);
//! let text = advisor
//!     .generate_advisory(&record.observation, &record, &AdvisoryProfile::default())
//!     .await?;
//! ```

mod client;

use std::fmt::Write;

use async_trait::async_trait;
use cardio_core::{CardioError, HealthObservation, Level, PredictionRecord, RiskLabel, Sex};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use client::{LlmClient, LlmMetrics, LlmResponse};

const SYSTEM_PROMPT: &str = "You are a cardiovascular health coach. Given a person's \
measurements and a model's risk estimate, suggest practical lifestyle changes in plain \
language. Keep it under 150 words, use short bullet points, and recommend seeing a \
doctor for anything clinical. Do not diagnose.";

/// Caller-supplied context for advisory generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvisoryProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Produces free-text lifestyle advice for a prediction.
#[async_trait]
pub trait AdvisoryGenerator: Send + Sync {
    async fn generate_advisory(
        &self,
        observation: &HealthObservation,
        prediction: &PredictionRecord,
        profile: &AdvisoryProfile,
    ) -> Result<String, CardioError>;
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Normal => "normal",
        Level::AboveNormal => "above normal",
        Level::WellAboveNormal => "well above normal",
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Renders the user message describing the observation and prediction.
pub fn build_prompt(
    observation: &HealthObservation,
    prediction: &PredictionRecord,
    profile: &AdvisoryProfile,
) -> String {
    let mut prompt = String::new();

    if let Some(name) = profile.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(prompt, "Name: {}", name.trim());
    }

    let sex = match observation.sex {
        Sex::Female => "female",
        Sex::Male => "male",
    };
    let _ = writeln!(prompt, "Age: {:.0}, sex: {}", observation.age, sex);
    let _ = writeln!(
        prompt,
        "Height: {:.0} cm, weight: {:.1} kg, BMI: {:.1}",
        observation.height, observation.weight, observation.bmi
    );
    let _ = writeln!(
        prompt,
        "Blood pressure: {:.0}/{:.0} mmHg",
        observation.ap_hi, observation.ap_lo
    );
    let _ = writeln!(
        prompt,
        "Cholesterol: {}, glucose: {}",
        level_label(observation.cholesterol),
        level_label(observation.glucose)
    );
    let _ = writeln!(
        prompt,
        "Smoker: {}, drinks alcohol: {}, physically active: {}",
        yes_no(observation.smoker),
        yes_no(observation.alcohol),
        yes_no(observation.active)
    );

    let risk = match prediction.label {
        RiskLabel::AtRisk => "elevated",
        RiskLabel::NoRisk => "not elevated",
    };
    match prediction.probability {
        Some(p) => {
            let _ = writeln!(prompt, "Model estimate: risk {} ({:.0}% probability)", risk, p * 100.0);
        }
        None => {
            let _ = writeln!(prompt, "Model estimate: risk {}", risk);
        }
    }

    if !profile.goals.is_empty() {
        let _ = writeln!(prompt, "Personal goals: {}", profile.goals.join(", "));
    }
    if let Some(notes) = profile.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(prompt, "Notes: {}", notes.trim());
    }

    prompt
}

/// [`AdvisoryGenerator`] backed by an OpenAI-compatible chat endpoint.
pub struct LlmAdvisor {
    client: LlmClient,
}

impl LlmAdvisor {
    pub fn new(model: &str, api_base: Option<&str>) -> Self {
        Self { client: LlmClient::new(model, api_base) }
    }
}

#[async_trait]
impl AdvisoryGenerator for LlmAdvisor {
    async fn generate_advisory(
        &self,
        observation: &HealthObservation,
        prediction: &PredictionRecord,
        profile: &AdvisoryProfile,
    ) -> Result<String, CardioError> {
        let prompt = build_prompt(observation, prediction, profile);
        let response = self.client.chat(SYSTEM_PROMPT, &prompt).await?;

        let text = response.content.trim().to_string();
        if text.is_empty() {
            return Err(CardioError::Advisory("empty advisory text".into()));
        }

        info!(
            "Generated advisory for {} ({} output tokens)",
            prediction.subject_id(),
            response.metrics.output_tokens
        );
        Ok(text)
    }
}
