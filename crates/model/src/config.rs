use serde::{Deserialize, Serialize};

/// Hazard categories a provider may filter generated content on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarmCategory {
    /// Hateful content.
    HateSpeech,
    /// Content promoting dangerous activities.
    DangerousContent,
    /// Sexually explicit content.
    SexuallyExplicit,
    /// Harassing content.
    Harassment,
}

impl HarmCategory {
    /// Every category, in a stable order.
    pub const ALL: [HarmCategory; 4] = [
        HarmCategory::HateSpeech,
        HarmCategory::DangerousContent,
        HarmCategory::SexuallyExplicit,
        HarmCategory::Harassment,
    ];
}

/// How aggressively a [`HarmCategory`] gets blocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyThreshold {
    /// The filter is turned off entirely.
    Off,
    /// Nothing is blocked, but the content is still rated.
    BlockNone,
    /// Only content with a high probability of harm is blocked.
    BlockOnlyHigh,
    /// Content with a medium or high probability of harm is blocked.
    BlockMediumAndAbove,
}

/// A threshold for a single hazard category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SafetySetting {
    /// The category to configure.
    pub category: HarmCategory,
    /// The threshold applied to the category.
    pub threshold: SafetyThreshold,
}

/// Sampling and safety parameters of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Seed for the sampler, if the provider supports one.
    pub seed: Option<i32>,
    /// Upper bound of generated tokens for one response.
    pub max_output_tokens: Option<u32>,
    /// Safety thresholds, one per configured category.
    pub safety_settings: Vec<SafetySetting>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            seed: None,
            max_output_tokens: None,
            safety_settings: vec![],
        }
    }
}
