use std::sync::Arc;

use rapport_model::{
    GenerationConfig, HarmCategory, ModelProvider, SafetySetting,
    SafetyThreshold,
};

use super::{Notice, Orchestrator};
use crate::model_client::ModelClient;
use crate::tool::{AnyTool, Registry, Tool, ToolObject};

/// [`Orchestrator`] builder.
pub struct OrchestratorBuilder {
    model_client: ModelClient,
    tools: Vec<Box<dyn ToolObject>>,
    on_notice: Option<Arc<dyn Fn(Notice) + Send + Sync>>,
    config: GenerationConfig,
    pass_limit: Option<usize>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            tools: vec![],
            on_notice: None,
            config: default_generation_config(),
            pass_limit: None,
        }
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Box::new(AnyTool(tool)));
        self
    }

    /// Attaches a callback to be invoked with every [`Notice`] of a turn.
    #[inline]
    pub fn on_notice(
        mut self,
        on_notice: impl Fn(Notice) + Send + Sync + 'static,
    ) -> Self {
        self.on_notice = Some(Arc::new(on_notice));
        self
    }

    /// Caps the number of streaming calls of a single turn.
    ///
    /// There is no cap by default.
    #[inline]
    pub fn with_pass_limit(mut self, limit: usize) -> Self {
        self.pass_limit = Some(limit);
        self
    }

    /// Builds the orchestrator.
    #[inline]
    pub fn build(self) -> Orchestrator {
        let Self {
            model_client,
            tools,
            on_notice,
            config,
            pass_limit,
        } = self;
        Orchestrator {
            model_client,
            registry: Arc::new(Registry::with_tools(tools)),
            on_notice,
            config,
            pass_limit,
        }
    }
}

/// Low-temperature, seeded decoding with every safety filter turned off.
pub(crate) fn default_generation_config() -> GenerationConfig {
    GenerationConfig {
        temperature: 0.1,
        seed: Some(133),
        max_output_tokens: Some(65_535),
        safety_settings: HarmCategory::ALL
            .iter()
            .map(|category| SafetySetting {
                category: *category,
                threshold: SafetyThreshold::Off,
            })
            .collect(),
    }
}
